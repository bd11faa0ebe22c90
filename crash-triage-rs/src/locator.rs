//! # Stack Frame Locator
//!
//! Best-effort extraction of the first user-code source position from a
//! free-form stack trace. Stack formats vary by runtime and bundler, so the
//! locator works line by line with a fixed, ordered list of frame shapes and
//! a noise filter for runtime-internal frames.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::report::{ErrorLike, Failure};

/// Substrings marking frames that never qualify as the report's location
pub const DEFAULT_NOISE_MARKERS: &[&str] = &["node:internal", "internal/", "<anonymous>"];

/// Source position extracted from one stack frame
///
/// `line` and `column` keep the literal digits from the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub file: String,
    pub line: String,
    pub column: String,
    pub frame_text: String,
}

/// The frame shapes, in the order they are tried against each line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTier {
    /// `file:///...:line:col`, optionally parenthesized
    FileUrl,
    /// `/abs/path:line:col`
    PosixPath,
    /// `C:\path:line:col`
    WindowsPath,
    /// any non-whitespace token before `:line:col`
    Fallback,
}

struct FramePattern {
    tier: FrameTier,
    regex: Regex,
}

// Tie-break order matters: reordering changes which layout wins on ambiguous lines.
static FRAME_PATTERNS: Lazy<Vec<FramePattern>> = Lazy::new(|| {
    [
        (FrameTier::FileUrl, r"(?:at\s+\(?)(file:///[^\s):]+):(\d+):(\d+)\)?"),
        (FrameTier::PosixPath, r"(?:at\s+\(?)(/[^\s):]+):(\d+):(\d+)\)?"),
        (FrameTier::WindowsPath, r"(?:at\s+\()?([A-Za-z]:\\[^\s):]+):(\d+):(\d+)\)?"),
        (FrameTier::Fallback, r"(?:at\s+.*\()?([^\s):]+):(\d+):(\d+)\)?"),
    ]
    .into_iter()
    .filter_map(|(tier, pattern)| match Regex::new(pattern) {
        Ok(regex) => Some(FramePattern { tier, regex }),
        Err(e) => {
            tracing::error!(?tier, error = %e, "Invalid frame pattern");
            None
        }
    })
    .collect()
});

/// Anything the locator can pull a stack string out of
#[derive(Debug, Clone, Copy)]
pub enum StackInput<'a> {
    Text(&'a str),
    Error(&'a ErrorLike),
    Value(&'a Value),
}

impl<'a> From<&'a str> for StackInput<'a> {
    fn from(text: &'a str) -> Self {
        StackInput::Text(text)
    }
}

impl<'a> From<&'a String> for StackInput<'a> {
    fn from(text: &'a String) -> Self {
        StackInput::Text(text.as_str())
    }
}

impl<'a> From<&'a ErrorLike> for StackInput<'a> {
    fn from(error: &'a ErrorLike) -> Self {
        StackInput::Error(error)
    }
}

impl<'a> From<&'a Value> for StackInput<'a> {
    fn from(value: &'a Value) -> Self {
        StackInput::Value(value)
    }
}

impl<'a> From<&'a Failure> for StackInput<'a> {
    fn from(failure: &'a Failure) -> Self {
        match failure {
            Failure::Text(text) => StackInput::Text(text),
            Failure::Error(error) => StackInput::Error(error),
            Failure::Value(value) => StackInput::Value(value),
        }
    }
}

impl StackInput<'_> {
    /// Coerces the input to stack text: long-form report, then `stack`,
    /// then a plain rendering.
    fn stack_text(&self) -> Option<String> {
        let text = match self {
            StackInput::Text(text) => Some((*text).to_string()),
            StackInput::Error(error) => error
                .full_report
                .clone()
                .filter(|s| !s.is_empty())
                .or_else(|| error.stack.clone().filter(|s| !s.is_empty()))
                .or_else(|| Some(error.display())),
            StackInput::Value(value) => match value {
                Value::Null => None,
                Value::String(text) => Some(text.clone()),
                Value::Object(map) => ["fullReport", "stack"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
                    .map(str::to_string)
                    .or_else(|| Some(value.to_string())),
                other => Some(other.to_string()),
            },
        };

        text.filter(|s| !s.is_empty())
    }
}

/// Tiered stack-frame locator
#[derive(Debug, Clone)]
pub struct StackLocator {
    noise_markers: Vec<String>,
}

impl Default for StackLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl StackLocator {
    /// Creates a locator with the default noise markers
    pub fn new() -> Self {
        Self {
            noise_markers: DEFAULT_NOISE_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Adds extra noise markers on top of the defaults
    pub fn with_noise_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.noise_markers.extend(markers.into_iter().map(Into::into));
        self
    }

    /// Returns the first user-code location in the stack, if any
    pub fn locate(&self, input: Option<StackInput<'_>>) -> Option<SourceLocation> {
        self.locate_frame(input).map(|(_, location)| location)
    }

    /// Convenience wrapper for raw stack text
    pub fn locate_str(&self, stack: &str) -> Option<SourceLocation> {
        self.locate(Some(StackInput::Text(stack)))
    }

    /// Like [`locate`](Self::locate) but also reports which tier matched
    pub fn locate_frame(&self, input: Option<StackInput<'_>>) -> Option<(FrameTier, SourceLocation)> {
        let mut stack = input?.stack_text()?;

        // Traces that went through a JSON round-trip carry escaped newlines.
        if stack.contains("\\n") {
            stack = stack.replace("\\n", "\n");
        }

        let mut lines: Vec<&str> = stack.split('\n').map(str::trim).collect();
        if lines.first().map_or(false, |first| first.starts_with("Error")) {
            lines.remove(0);
        }

        lines
            .into_iter()
            .filter(|line| !line.is_empty() && !self.is_noise(line))
            .find_map(match_frame)
    }

    fn is_noise(&self, line: &str) -> bool {
        self.noise_markers.iter().any(|marker| line.contains(marker.as_str()))
    }
}

fn match_frame(line: &str) -> Option<(FrameTier, SourceLocation)> {
    FRAME_PATTERNS.iter().find_map(|pattern| {
        pattern
            .regex
            .captures(line)
            .and_then(|caps| extract(&caps, line))
            .map(|location| (pattern.tier, location))
    })
}

fn extract(caps: &Captures<'_>, line: &str) -> Option<SourceLocation> {
    Some(SourceLocation {
        file: caps.get(1)?.as_str().to_string(),
        line: caps.get(2)?.as_str().to_string(),
        column: caps.get(3)?.as_str().to_string(),
        frame_text: line.to_string(),
    })
}
