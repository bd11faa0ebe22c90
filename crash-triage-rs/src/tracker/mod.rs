//! # Issue Store
//!
//! The remote CRUD interface the handler executes decisions against. The
//! reconciliation engine never calls it directly; the handler lists items,
//! hands them to the reconciler and then applies the resulting decision.

pub mod github;

pub use github::GitHubIssueStore;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reconcile::{ItemState, TrackedItem};

/// Result type for issue store operations
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Errors raised by an issue store
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Network or connection errors
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials missing, invalid or lacking permission
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Repository or item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Any other non-success response
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Response body did not have the expected shape
    #[error("Response decode error: {0}")]
    Decode(String),

    /// Listing hit the page limit with more items possibly left
    #[error("Listing truncated: every one of {pages} pages was full")]
    Truncated { pages: u32 },

    /// Client could not be built from the given settings
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TrackerError {
    /// Check if this is a retryable error
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Network(_) | TrackerError::RateLimited(_) => true,
            TrackerError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Maps a non-success HTTP response to an error
    pub fn from_status(status: StatusCode, body: &str, rate_limit_exhausted: bool) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|json| json.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());

        match status {
            StatusCode::TOO_MANY_REQUESTS => TrackerError::RateLimited(message),
            StatusCode::FORBIDDEN if rate_limit_exhausted => TrackerError::RateLimited(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TrackerError::Authentication(message),
            StatusCode::NOT_FOUND => TrackerError::NotFound(message),
            _ => TrackerError::Rejected {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrackerError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            TrackerError::Network(format!("Connection error: {}", err))
        } else if err.is_decode() {
            TrackerError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TrackerError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TrackerError::Network(err.to_string())
        }
    }
}

/// Which items to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFilter {
    /// Items must carry every one of these labels
    pub labels: Vec<String>,
    /// Only items created by the authenticated account
    pub created_by_me: bool,
}

impl ItemFilter {
    /// Automated reports in every state, carrying `label`
    pub fn automated(label: impl Into<String>) -> Self {
        Self {
            labels: vec![label.into()],
            created_by_me: true,
        }
    }
}

/// Fields of an item to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Remote issue tracker
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Lists items in every state matching `filter`
    async fn list(&self, filter: &ItemFilter) -> TrackerResult<Vec<TrackedItem>>;

    /// Creates an item
    async fn create(&self, draft: &IssueDraft) -> TrackerResult<TrackedItem>;

    /// Moves an item to `state`
    async fn update_state(&self, id: u64, state: ItemState) -> TrackerResult<()>;

    /// Appends a comment to an item
    async fn add_comment(&self, id: u64, text: &str) -> TrackerResult<()>;
}
