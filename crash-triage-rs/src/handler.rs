//! # Crash Handler
//!
//! Runs one failure through the whole pipeline: locate the user frame,
//! build the report, fingerprint it, list tracked items, reconcile and
//! execute the decision against the issue store.

use std::fmt;
use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::identity::RepoIdentity;
use crate::locator::{StackInput, StackLocator};
use crate::reconcile::{Decision, ItemState, Reconciler};
use crate::render::render_issue;
use crate::report::{ErrorReport, Failure};
use crate::tracker::{GitHubIssueStore, IssueStore, ItemFilter};
use crate::types::{Error, Result};

/// What handling a failure did to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(u64),
    Reopened(u64),
    Commented(u64),
    Suppressed(u64),
}

impl Outcome {
    /// Id of the item the failure was filed under
    pub fn id(&self) -> u64 {
        match self {
            Outcome::Created(id) | Outcome::Reopened(id) | Outcome::Commented(id) | Outcome::Suppressed(id) => *id,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created(id) => write!(f, "created #{}", id),
            Outcome::Reopened(id) => write!(f, "reopened #{}", id),
            Outcome::Commented(id) => write!(f, "commented on #{}", id),
            Outcome::Suppressed(id) => write!(f, "suppressed by #{}", id),
        }
    }
}

/// Files failures against an issue store
pub struct CrashHandler {
    store: Arc<dyn IssueStore>,
    locator: StackLocator,
    fingerprinter: Fingerprinter,
    reconciler: Reconciler,
    identity: RepoIdentity,
    filter: ItemFilter,
    labels: Vec<String>,
}

impl fmt::Debug for CrashHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashHandler")
            .field("identity", &self.identity)
            .field("filter", &self.filter)
            .field("labels", &self.labels)
            .finish()
    }
}

impl CrashHandler {
    /// Creates a handler with default locator, fingerprinter and labels
    pub fn new(store: Arc<dyn IssueStore>, identity: RepoIdentity) -> Self {
        let defaults = TrackerConfig::default();
        Self {
            store,
            locator: StackLocator::new(),
            fingerprinter: Fingerprinter::default(),
            reconciler: Reconciler::new(identity.build_id.clone()),
            identity,
            filter: ItemFilter::automated(defaults.search_label),
            labels: defaults.labels,
        }
    }

    /// Builds a GitHub-backed handler, discovering the identity when needed
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let identity = RepoIdentity::resolve(config)?;
        let store = GitHubIssueStore::new(config, &identity.owner, &identity.repo)?;

        tracing::info!(
            owner = %identity.owner,
            repo = %identity.repo,
            build_id = %identity.build_id,
            "Crash handler configured"
        );

        Ok(Self::new(Arc::new(store), identity)
            .with_locator(StackLocator::new().with_noise_markers(config.extra_noise_markers.iter().cloned()))
            .with_filter(ItemFilter::automated(config.search_label.clone()))
            .with_labels(config.labels.clone()))
    }

    pub fn with_locator(mut self, locator: StackLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn with_filter(mut self, filter: ItemFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn identity(&self) -> &RepoIdentity {
        &self.identity
    }

    /// Files one failure
    pub async fn handle(&self, failure: &Failure) -> Result<Outcome> {
        let span = tracing::info_span!(
            "crash_report",
            occurrence_id = %Uuid::new_v4(),
            fingerprint = tracing::field::Empty
        );

        self.handle_inner(failure).instrument(span).await
    }

    /// Like [`handle`](Self::handle) but logs errors instead of returning them
    pub async fn handle_quietly(&self, failure: &Failure) -> Option<Outcome> {
        match self.handle(failure).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(error = %e, transient = e.is_transient(), "Failed to file crash report");
                None
            }
        }
    }

    /// Builds and fingerprints the report for `failure` without touching the store
    pub fn prepare(&self, failure: &Failure) -> (ErrorReport, Fingerprint) {
        // Frames live in `stack`; the long form may carry other text first.
        let location = match failure {
            Failure::Error(error) => error.stack.as_deref().and_then(|stack| self.locator.locate_str(stack)),
            _ => None,
        }
        .or_else(|| self.locator.locate(Some(StackInput::from(failure))));
        let report = ErrorReport::capture(failure, location);
        let fingerprint = self.fingerprinter.fingerprint(&report);
        (report, fingerprint)
    }

    async fn handle_inner(&self, failure: &Failure) -> Result<Outcome> {
        let (report, fingerprint) = self.prepare(failure);
        tracing::Span::current().record("fingerprint", fingerprint.as_str());

        let candidates = self.store.list(&self.filter).await.map_err(|e| {
            Error::from(e).context("operation", "list")
        })?;
        tracing::debug!(candidates = candidates.len(), "Fetched tracked items");

        let decision = self.reconciler.reconcile(&report, &fingerprint, &candidates);
        tracing::info!(action = decision.action(), "Reconciled crash report");

        self.apply(decision).await
    }

    async fn apply(&self, decision: Decision) -> Result<Outcome> {
        match decision {
            Decision::CreateNew { report, fingerprint } => {
                let draft = render_issue(&report, &fingerprint, &self.identity, &self.labels);
                let item = self
                    .store
                    .create(&draft)
                    .await
                    .map_err(|e| Error::from(e).context("operation", "create"))?;
                tracing::info!(item = item.id, "Created tracked item");
                Ok(Outcome::Created(item.id))
            }
            Decision::Suppress { item } => {
                tracing::info!(item = item.id, locked = item.locked, "Tracked item is dormant, not touching it");
                Ok(Outcome::Suppressed(item.id))
            }
            Decision::ReopenAndComment { item, note } => {
                // The comment must never land on an item that stayed closed.
                self.store
                    .update_state(item.id, ItemState::Open)
                    .await
                    .map_err(|e| Error::from(e).context("operation", "reopen").context("item", item.id))?;
                self.store
                    .add_comment(item.id, &note.to_string())
                    .await
                    .map_err(|e| Error::from(e).context("operation", "comment").context("item", item.id))?;
                tracing::info!(item = item.id, "Reopened tracked item");
                Ok(Outcome::Reopened(item.id))
            }
            Decision::Comment { item, note } => {
                self.store
                    .add_comment(item.id, &note.to_string())
                    .await
                    .map_err(|e| Error::from(e).context("operation", "comment").context("item", item.id))?;
                tracing::info!(item = item.id, "Commented on tracked item");
                Ok(Outcome::Commented(item.id))
            }
        }
    }
}

