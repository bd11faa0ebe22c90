//! # Report Queue
//!
//! Event sources hand failures to a bounded channel drained by a single
//! background worker. Every failure of the process is therefore handled one
//! at a time: two concurrent identical failures cannot both miss each
//! other's tracked item and create duplicates.
//!
//! The worker is a Tokio task, so it stops with the runtime. A process that
//! is about to exit, including after a panic on the thread driving the
//! runtime, must [`flush`](ReportQueue::flush) first or queued reports are
//! lost:
//!
//! ```no_run
//! # async fn app() {}
//! # async fn run() -> crash_triage::Result<()> {
//! let (queue, _worker) = crash_triage::init(None)?;
//! let outcome = tokio::spawn(app()).await;
//! queue.flush(std::time::Duration::from_secs(10)).await;
//! if let Err(panic) = outcome {
//!     std::panic::resume_unwind(panic.into_panic());
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::handler::CrashHandler;
use crate::report::Failure;
use crate::types::{Error, ErrorKind, Result};

/// Failures accepted but not yet handled
#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Sending half of the report queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ReportQueue {
    sender: mpsc::Sender<Failure>,
    pending: Arc<Pending>,
}

impl ReportQueue {
    /// Starts the worker. The returned task finishes once every queue
    /// handle is dropped and yields the number of failures processed.
    pub fn spawn(handler: Arc<CrashHandler>, capacity: usize) -> (Self, JoinHandle<usize>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Pending::default());
        let worker = tokio::spawn(Self::run_worker(receiver, handler, pending.clone()));
        (Self { sender, pending }, worker)
    }

    async fn run_worker(
        mut receiver: mpsc::Receiver<Failure>,
        handler: Arc<CrashHandler>,
        pending: Arc<Pending>,
    ) -> usize {
        let mut processed = 0;

        while let Some(failure) = receiver.recv().await {
            if let Some(outcome) = handler.handle_quietly(&failure).await {
                tracing::debug!(%outcome, "Crash report filed");
            }
            processed += 1;
            pending.done();
        }

        tracing::debug!(processed, "Report queue closed");
        processed
    }

    /// Enqueues without waiting. Returns false when the failure was dropped.
    pub fn submit(&self, failure: Failure) -> bool {
        self.pending.add();
        match self.sender.try_send(failure) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.pending.done();
                tracing::warn!("Report queue full, dropping failure");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.pending.done();
                tracing::warn!("Report queue closed, dropping failure");
                false
            }
        }
    }

    /// Enqueues, waiting for capacity
    pub async fn submit_wait(&self, failure: Failure) -> Result<()> {
        self.pending.add();
        self.sender.send(failure).await.map_err(|_| {
            self.pending.done();
            Error::new(ErrorKind::Internal, "Report queue worker has stopped")
        })
    }

    /// Number of accepted failures not yet handled
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Waits until every accepted failure has been handled. Returns false
    /// when `timeout` elapses first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                // Register before checking so a wakeup between the two is not missed.
                let idle = self.pending.idle.notified();
                if self.pending() == 0 {
                    return;
                }
                idle.await;
            }
        };

        let flushed = tokio::time::timeout(timeout, drained).await.is_ok();
        if !flushed {
            tracing::warn!(pending = self.pending(), "Timed out flushing report queue");
        }
        flushed
    }
}
