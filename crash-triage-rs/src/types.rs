//! # Crate Error Types
//!
//! Standardized error type for the crash-triage pipeline. The pure engine
//! (fingerprinting, locating, reconciling) never fails; these errors come
//! from the collaborators around it: configuration, identity discovery and
//! the issue store.

use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;

use crate::tracker::TrackerError;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categorizes the failures the pipeline can hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Settings could not be loaded or are incomplete
    Configuration,
    /// Repository owner, name or build id could not be resolved
    Identity,
    /// The issue store rejected or failed a request
    Tracker,
    /// Unexpected internal state
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "Configuration Error"),
            ErrorKind::Identity => write!(f, "Identity Error"),
            ErrorKind::Tracker => write!(f, "Tracker Error"),
            ErrorKind::Internal => write!(f, "Internal Error"),
        }
    }
}

/// Core error type for the crash-triage pipeline
#[derive(Debug)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Detailed error message
    pub message: String,
    /// Additional context as key-value pairs
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Underlying cause, if any
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the specified kind and message
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
            context: serde_json::Map::new(),
            cause: None,
        }
    }

    /// Adds context information to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns true if retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        self.cause
            .as_ref()
            .and_then(|c| c.downcast_ref::<TrackerError>())
            .map_or(false, TrackerError::is_transient)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;

        if !self.context.is_empty() {
            write!(f, " [")?;
            let mut first = true;
            for (k, v) in &self.context {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", k, v)?;
                first = false;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::new(ErrorKind::Configuration, err.to_string()).cause(err)
    }
}

impl From<TrackerError> for Error {
    fn from(err: TrackerError) -> Self {
        Self::new(ErrorKind::Tracker, err.to_string()).cause(err)
    }
}
