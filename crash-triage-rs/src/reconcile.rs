//! # Issue Reconciliation
//!
//! Decides what to do with a fingerprinted report given the items already
//! tracked remotely. The decision is pure: executing it against the issue
//! store is the caller's job.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::report::ErrorReport;

/// State reason an operator sets to mark an item as deliberately not worked
pub const NOT_PLANNED: &str = "not_planned";

/// Open/closed state of a tracked item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Open => write!(f, "open"),
            ItemState::Closed => write!(f, "closed"),
        }
    }
}

/// A remote issue as seen by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: u64,
    pub state: ItemState,
    pub locked: bool,
    pub state_reason: Option<String>,
    pub body: String,
}

impl TrackedItem {
    /// Locked or closed as not planned: recurrences must leave it alone
    pub fn is_dormant(&self) -> bool {
        self.locked || self.state_reason.as_deref() == Some(NOT_PLANNED)
    }

    /// True when the body embeds `fingerprint` verbatim
    pub fn carries(&self, fingerprint: &Fingerprint) -> bool {
        !fingerprint.as_str().is_empty() && self.body.contains(fingerprint.as_str())
    }
}

/// Comment appended when a known fault happens again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityNote {
    pub occurred_at: DateTime<Utc>,
    pub build_id: String,
}

impl fmt::Display for ActivityNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "⚠️ Still an active issue.\n\nError occurred at: {}\nCommit: {}",
            self.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.build_id
        )
    }
}

/// What the issue store should do about one report
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No tracked item carries the fingerprint
    CreateNew {
        report: ErrorReport,
        fingerprint: Fingerprint,
    },
    /// The matching item is dormant
    Suppress { item: TrackedItem },
    /// The matching item is closed: reopen it, then comment
    ReopenAndComment { item: TrackedItem, note: ActivityNote },
    /// The matching item is already open
    Comment { item: TrackedItem, note: ActivityNote },
}

impl Decision {
    /// Short label used in logs
    pub fn action(&self) -> &'static str {
        match self {
            Decision::CreateNew { .. } => "create",
            Decision::Suppress { .. } => "suppress",
            Decision::ReopenAndComment { .. } => "reopen_and_comment",
            Decision::Comment { .. } => "comment",
        }
    }
}

/// Matches fingerprints against tracked items
#[derive(Debug, Clone)]
pub struct Reconciler {
    build_id: String,
}

impl Reconciler {
    pub fn new<S: Into<String>>(build_id: S) -> Self {
        Self {
            build_id: build_id.into(),
        }
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Decides against `candidates`, stamping notes with the current time
    pub fn reconcile(&self, report: &ErrorReport, fingerprint: &Fingerprint, candidates: &[TrackedItem]) -> Decision {
        self.reconcile_at(report, fingerprint, candidates, Utc::now())
    }

    /// Decides against `candidates`; the first item in scan order carrying
    /// the fingerprint wins
    pub fn reconcile_at(
        &self,
        report: &ErrorReport,
        fingerprint: &Fingerprint,
        candidates: &[TrackedItem],
        now: DateTime<Utc>,
    ) -> Decision {
        let Some(item) = candidates.iter().find(|item| item.carries(fingerprint)) else {
            return Decision::CreateNew {
                report: report.clone(),
                fingerprint: fingerprint.clone(),
            };
        };

        // Dormancy is checked before state so a dormant closed item stays closed.
        if item.is_dormant() {
            return Decision::Suppress { item: item.clone() };
        }

        let note = ActivityNote {
            occurred_at: now,
            build_id: self.build_id.clone(),
        };

        match item.state {
            ItemState::Closed => Decision::ReopenAndComment {
                item: item.clone(),
                note,
            },
            ItemState::Open => Decision::Comment {
                item: item.clone(),
                note,
            },
        }
    }
}
