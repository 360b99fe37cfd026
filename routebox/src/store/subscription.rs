//! Change listeners for live queries.
//!
//! A listener receives the full result set after every committed change.
//! It stays registered for as long as its [`Subscription`] is alive.
//!
//! Listeners are always called with no lock of this module held, so a
//! callback may read the store, subscribe, or drop its own subscription.
//! An owner that wraps the store in its own lock switches the set to
//! deferred mode: writes then queue their snapshot, and the owner calls
//! [`Listeners::flush`] once its lock is released.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

pub(crate) struct Listeners<T> {
    inner: Arc<Mutex<ListenerSet<T>>>,
    pending: Arc<Mutex<VecDeque<Vec<T>>>>,
    deferred: bool,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            pending: Arc::clone(&self.pending),
            deferred: self.deferred,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + 'static> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            deferred: false,
        }
    }

    /// Queue snapshots from [`publish`](Self::publish) instead of
    /// delivering them; [`flush`](Self::flush) delivers the queue.
    pub(crate) fn defer(&mut self) {
        self.deferred = true;
    }

    pub(crate) fn subscribe(&self, listener: Listener<T>) -> Subscription {
        let mut set = lock(&self.inner);
        let id = set.next_id;
        set.next_id += 1;
        set.entries.push((id, listener));

        let weak: Weak<Mutex<ListenerSet<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        lock(&self.inner).entries.is_empty()
    }

    /// Deliver `snapshot` now, or queue it in deferred mode.
    pub(crate) fn publish(&self, snapshot: Vec<T>) {
        if self.deferred {
            lock(&self.pending).push_back(snapshot);
        } else {
            self.deliver(&snapshot);
        }
    }

    /// Deliver queued snapshots in commit order.
    pub(crate) fn flush(&self) {
        loop {
            let next = lock(&self.pending).pop_front();
            match next {
                Some(snapshot) => self.deliver(&snapshot),
                None => break,
            }
        }
    }

    fn deliver(&self, snapshot: &[T]) {
        let listeners: Vec<Listener<T>> = lock(&self.inner)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
