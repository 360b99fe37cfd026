//! Background export worker.
//!
//! Runs [`ExportOrchestrator::process_routes`] on a dedicated thread so the
//! caller stays responsive. Only one job is active at a time: submitting a
//! new job cancels and joins the previous one first. The result is delivered
//! on a oneshot channel and can be awaited from async code or waited for
//! from a blocking context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use tokio::sync::oneshot::{self, error::TryRecvError};

use routecore::{
    CancellationToken, ExportBundle, ExportError, ExportOptions, ExportOrchestrator,
    ExportProgress, RouteEntity,
};

use crate::error::{AppError, AppResult};

/// Progress sink invoked from the worker thread.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

struct ActiveJob {
    id: u64,
    token: CancellationToken,
    thread: JoinHandle<()>,
}

pub struct ExportWorker {
    orchestrator: Arc<ExportOrchestrator>,
    active: Mutex<Option<ActiveJob>>,
    /// Held for a whole submit, from terminating the old job to installing
    /// the new one.
    submitting: Mutex<()>,
    next_id: AtomicU64,
}

impl ExportWorker {
    pub fn new(orchestrator: ExportOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            active: Mutex::new(None),
            submitting: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_default_codec() -> Self {
        Self::new(ExportOrchestrator::with_default_codec())
    }

    pub fn orchestrator(&self) -> &ExportOrchestrator {
        &self.orchestrator
    }

    /// Start an export on a background thread, replacing any running job.
    pub fn submit(
        &self,
        routes: Vec<RouteEntity>,
        options: ExportOptions,
        on_progress: ProgressCallback,
    ) -> AppResult<ExportJob> {
        let _submitting = self.submitting.lock().unwrap_or_else(PoisonError::into_inner);
        self.terminate();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        let orchestrator = Arc::clone(&self.orchestrator);
        let job_token = token.clone();
        let thread = thread::Builder::new()
            .name(format!("route-export-{}", id))
            .spawn(move || {
                info!("[worker] Job {} started with {} routes", id, routes.len());
                let result =
                    orchestrator.process_routes(&routes, &options, &job_token, &*on_progress);
                match &result {
                    Ok(bundle) => info!(
                        "[worker] Job {} finished with {} entries",
                        id,
                        bundle.entries.len()
                    ),
                    Err(e) if e.is_cancelled() => info!("[worker] Job {} cancelled", id),
                    Err(e) => warn!("[worker] Job {} failed: {}", id, e),
                }
                // The receiver may already be gone; nothing else to notify.
                let _ = tx.send(result);
            })?;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = Some(ActiveJob {
            id,
            token: token.clone(),
            thread,
        });

        Ok(ExportJob {
            id,
            token,
            receiver: rx,
        })
    }

    /// Request cancellation of the active job, if any.
    pub fn cancel(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = active.as_ref() {
            debug!("[worker] Cancelling job {}", job.id);
            job.token.cancel();
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|job| !job.thread.is_finished())
    }

    /// Cancel the active job and wait for its thread to exit.
    pub fn terminate(&self) {
        let job = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(job) = job {
            job.token.cancel();
            if job.thread.join().is_err() {
                warn!("[worker] Job {} panicked", job.id);
            }
            debug!("[worker] Job {} terminated", job.id);
        }
    }
}

impl Drop for ExportWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Handle to one submitted export.
pub struct ExportJob {
    id: u64,
    token: CancellationToken,
    receiver: oneshot::Receiver<Result<ExportBundle, ExportError>>,
}

fn settle(
    result: Result<Result<ExportBundle, ExportError>, oneshot::error::RecvError>,
) -> AppResult<ExportBundle> {
    match result {
        Ok(outcome) => Ok(outcome?),
        Err(_) => Err(AppError::WorkerCrashed),
    }
}

impl ExportJob {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking check for the result.
    pub fn try_result(&mut self) -> Option<AppResult<ExportBundle>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome.map_err(AppError::from)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(AppError::WorkerCrashed)),
        }
    }

    /// Block the current thread until the job finishes.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`ExportJob::finished`] there.
    pub fn wait(self) -> AppResult<ExportBundle> {
        settle(self.receiver.blocking_recv())
    }

    pub async fn finished(self) -> AppResult<ExportBundle> {
        settle(self.receiver.await)
    }
}
