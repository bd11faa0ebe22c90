//! # Crash Triage
//!
//! Turns runtime failures into deduplicated issue-tracker items.
//!
//! ## Features
//!
//! - Content fingerprints that ignore volatile fields (time, uptime, memory, cwd)
//! - Best-effort location of the first user-code frame in a stack trace
//! - Reconciliation of a fingerprint against tracked items: create, comment,
//!   reopen, or leave dormant items alone
//! - GitHub issue store, markdown rendering with source links and diagrams
//! - Serialized in-process handling through a report queue, with a panic hook
//!

pub mod types;
pub mod config;
pub mod logging;
pub mod locator;
pub mod report;
pub mod fingerprint;
pub mod reconcile;
pub mod render;
pub mod identity;
pub mod tracker;
pub mod handler;
pub mod queue;
pub mod hooks;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;

// Re-export commonly used types
pub use types::{Error, ErrorKind, Result};
pub use config::{load_settings, Settings, TrackerConfig};
pub use logging::{init_logging, LoggingConfig};
pub use locator::{SourceLocation, StackInput, StackLocator};
pub use report::{ErrorLike, ErrorReport, Failure};
pub use fingerprint::{fingerprint, Fingerprint, Fingerprinter};
pub use reconcile::{Decision, ItemState, Reconciler, TrackedItem};
pub use identity::RepoIdentity;
pub use tracker::{GitHubIssueStore, IssueDraft, IssueStore, ItemFilter, TrackerError};
pub use handler::{CrashHandler, Outcome};
pub use queue::ReportQueue;
pub use hooks::install_panic_hook;

/// Loads settings, initializes logging, starts the report queue and routes
/// panics to it. Must be called inside a Tokio runtime; the panic hook keeps
/// the queue, so the worker runs for the rest of the process.
///
/// Reports are filed in the background. Before the process exits, and in
/// particular after a panic on the thread that drives the runtime, call
/// [`ReportQueue::flush`] or pending reports are dropped with the runtime.
pub fn init(config_path: Option<&Path>) -> Result<(ReportQueue, JoinHandle<usize>)> {
    let settings = load_settings(config_path)?;
    init_with_settings(settings)
}

/// Like [`init`] with already loaded settings
pub fn init_with_settings(settings: Settings) -> Result<(ReportQueue, JoinHandle<usize>)> {
    init_logging(Some(settings.logging))?;

    let handler = Arc::new(CrashHandler::from_config(&settings.tracker)?);
    let (queue, worker) = ReportQueue::spawn(handler, settings.tracker.queue_capacity);
    install_panic_hook(queue.clone());

    Ok((queue, worker))
}
