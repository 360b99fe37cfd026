//! Cancellation, progress reporting and transient binary handles.
//!
//! These are the primitives the export pipeline shares with whatever thread
//! drives it: a cooperative cancellation flag, a progress record, and a
//! ledger that counts transient encoded blobs so callers can verify none
//! outlive a cancelled job.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ============================================================================
// Cancellation
// ============================================================================

/// Returned by [`CancellationToken::check`] once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("export cancelled by user")]
pub struct Cancelled;

/// Shared cooperative cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; visible to every clone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Progress
// ============================================================================

/// One progress report of an export job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    /// Completed work units, at most `total`.
    pub current: u32,
    pub total: u32,
    /// Short status line, e.g. "Exporting route Alps".
    pub message: String,
    /// Finer-grained step such as the photo being encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed_message: Option<String>,
}

/// Counts work units and forwards reports to a sink.
///
/// `current` only moves forward and never exceeds `total`.
pub struct ProgressTracker<'a> {
    current: u32,
    total: u32,
    sink: &'a dyn Fn(ExportProgress),
}

impl<'a> ProgressTracker<'a> {
    /// Start at zero of `total` units.
    pub fn new(total: u32, sink: &'a dyn Fn(ExportProgress)) -> Self {
        Self {
            current: 0,
            total,
            sink,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Report at the current position.
    pub fn report(&self, message: impl Into<String>, detail: Option<String>) {
        (self.sink)(ExportProgress {
            current: self.current,
            total: self.total,
            message: message.into(),
            detailed_message: detail,
        });
    }

    /// Mark one unit as done.
    pub fn advance(&mut self) {
        self.current = (self.current + 1).min(self.total);
    }

    /// Report completion at `(total, total)`.
    pub fn finish(&mut self, message: impl Into<String>) {
        self.current = self.total;
        self.report(message, None);
    }
}

// ============================================================================
// Transient handles
// ============================================================================

#[derive(Debug, Default)]
struct LedgerCounts {
    created: AtomicUsize,
    released: AtomicUsize,
}

/// Registry of transient encoded blobs.
///
/// Every [`BlobHandle`] is counted when created and again when released
/// (consumed with [`BlobHandle::into_bytes`] or dropped).
#[derive(Debug, Clone, Default)]
pub struct HandleLedger {
    counts: Arc<LedgerCounts>,
}

impl HandleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `bytes` in a counted handle.
    pub fn create(&self, bytes: Vec<u8>) -> BlobHandle {
        self.counts.created.fetch_add(1, Ordering::SeqCst);
        BlobHandle {
            data: bytes,
            counts: Arc::clone(&self.counts),
        }
    }

    /// Handles ever created through this ledger or its clones.
    pub fn created(&self) -> usize {
        self.counts.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counts.released.load(Ordering::SeqCst)
    }

    /// Handles created but not yet released.
    pub fn live(&self) -> usize {
        self.created().saturating_sub(self.released())
    }
}

/// An encoded blob owned by the pipeline until it is written out.
pub struct BlobHandle {
    data: Vec<u8>,
    counts: Arc<LedgerCounts>,
}

impl BlobHandle {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take the bytes out; the handle counts as released.
    pub fn into_bytes(mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_token_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.check(), Err(Cancelled));
    }

    #[test]
    fn test_ledger_counts_into_bytes_and_drop() {
        let ledger = HandleLedger::new();
        let a = ledger.create(vec![1, 2, 3]);
        let b = ledger.create(vec![4]);
        assert_eq!(ledger.live(), 2);
        assert_eq!(a.into_bytes(), vec![1, 2, 3]);
        assert_eq!(ledger.released(), 1);
        drop(b);
        assert_eq!(ledger.created(), 2);
        assert_eq!(ledger.released(), 2);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_tracker_is_monotone_and_capped() {
        let seen = RefCell::new(Vec::new());
        let sink = |p: ExportProgress| seen.borrow_mut().push((p.current, p.total));
        let mut tracker = ProgressTracker::new(2, &sink);
        tracker.report("start", None);
        tracker.advance();
        tracker.advance();
        tracker.advance();
        tracker.report("over", None);
        tracker.finish("done");
        assert_eq!(*seen.borrow(), vec![(0, 2), (2, 2), (2, 2)]);
    }
}
