//! # Error Reports
//!
//! The raw failure shapes the pipeline accepts from its event sources, and
//! the structured [`ErrorReport`] snapshot built from one failure.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::locator::SourceLocation;

static FIRST_CAPTURE: Lazy<Instant> = Lazy::new(Instant::now);

/// Symbol prefixes of frames that belong to backtrace capture itself
const CAPTURE_FRAME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "rust_begin_unwind",
    "__rust",
    concat!(env!("CARGO_CRATE_NAME"), "::report::"),
    concat!(env!("CARGO_CRATE_NAME"), "::hooks::"),
];

/// An error value as reported by a runtime, reduced to plain data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLike {
    pub name: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub stack: Option<String>,
    /// Long-form rendering of the whole error value
    pub full_report: Option<String>,
    pub code: Option<Value>,
    pub data: Option<Value>,
    pub cause: Option<Value>,
}

impl ErrorLike {
    /// Creates an error-like value carrying only a message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Captures a Rust error, its source chain and, when backtraces are
    /// enabled, the current backtrace
    pub fn from_error<E>(err: &E) -> Self
    where
        E: StdError + 'static,
    {
        Self::from_error_with_backtrace(err, &Backtrace::capture())
    }

    /// Like [`from_error`](Self::from_error) with an already captured backtrace
    pub fn from_error_with_backtrace<E>(err: &E, backtrace: &Backtrace) -> Self
    where
        E: StdError + 'static,
    {
        Self::build(err, short_type_name(std::any::type_name::<E>()), backtrace)
    }

    /// Captures a type-erased error; the name falls back to `Error`
    pub fn from_dyn_error(err: &(dyn StdError + 'static)) -> Self {
        Self::build(err, "Error".to_string(), &Backtrace::capture())
    }

    fn build(err: &(dyn StdError + 'static), name: String, backtrace: &Backtrace) -> Self {
        let message = err.to_string();
        let frames = match backtrace.status() {
            BacktraceStatus::Captured => Some(trim_capture_frames(&backtrace.to_string())),
            _ => None,
        };

        let header = format!("{}: {}", name, message);
        let stack = frames.as_ref().map(|frames| format!("{}\n{}", header, frames));

        // Long form: header, source chain, frames, then the Debug rendering.
        let mut full_report = header;
        let sources: Vec<String> = std::iter::successors(err.source(), |e| (*e).source())
            .map(|e| e.to_string())
            .collect();
        if !sources.is_empty() {
            full_report.push_str("\nCaused by:");
            for (i, source) in sources.iter().enumerate() {
                full_report.push_str(&format!("\n    {}: {}", i, source));
            }
        }
        if let Some(frames) = &frames {
            full_report.push_str("\nstack backtrace:\n");
            full_report.push_str(frames);
        }
        full_report.push_str(&format!("\n\n{:#?}", err));

        Self {
            name: Some(name.clone()),
            message: Some(message),
            type_name: Some(name),
            stack,
            full_report: Some(full_report),
            code: None,
            data: None,
            cause: cause_chain(err.source()),
        }
    }

    /// `Name: message`, the way runtimes print an error value
    pub fn display(&self) -> String {
        let name = self.name.as_deref().unwrap_or("Error");
        match self.message.as_deref() {
            Some(message) if !message.is_empty() => format!("{}: {}", name, message),
            _ => name.to_string(),
        }
    }
}

/// A raw failure handed over by an event source
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Bare text, usually a message or a whole printed trace
    Text(String),
    /// An error value
    Error(ErrorLike),
    /// An arbitrary JSON value thrown or rejected by foreign code
    Value(Value),
}

impl Failure {
    /// Wraps a Rust error
    pub fn from_error<E>(err: &E) -> Self
    where
        E: StdError + 'static,
    {
        Failure::Error(ErrorLike::from_error(err))
    }

    /// Builds a failure from the parts of a panic
    pub fn from_panic(message: &str, location: Option<&str>, backtrace: &str) -> Self {
        let header = match location {
            Some(location) => format!("panicked at {}:", location),
            None => "panicked:".to_string(),
        };

        Failure::Error(ErrorLike {
            name: Some("Panic".to_string()),
            message: Some(message.to_string()),
            type_name: Some("Panic".to_string()),
            stack: Some(format!("{}\n{}\nstack backtrace:\n{}", header, message, backtrace)),
            ..ErrorLike::default()
        })
    }
}

impl From<String> for Failure {
    fn from(text: String) -> Self {
        Failure::Text(text)
    }
}

impl From<&str> for Failure {
    fn from(text: &str) -> Self {
        Failure::Text(text.to_string())
    }
}

impl From<Value> for Failure {
    fn from(value: Value) -> Self {
        Failure::Value(value)
    }
}

impl From<ErrorLike> for Failure {
    fn from(error: ErrorLike) -> Self {
        Failure::Error(error)
    }
}

/// Process memory counters, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub rss: u64,
    pub virtual_memory: u64,
}

/// Volatile snapshot of the reporting process
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessInfo {
    /// Seconds the process has been running
    pub uptime: f64,
    pub memory_usage: Option<MemoryUsage>,
    pub cwd: Option<String>,
}

impl ProcessInfo {
    /// Samples the current process
    pub fn capture() -> Self {
        let cwd = std::env::current_dir().ok().map(|p| p.display().to_string());

        let sampled = sysinfo::get_current_pid().ok().and_then(|pid| {
            let mut system = sysinfo::System::new();
            if !system.refresh_process(pid) {
                return None;
            }
            system.process(pid).map(|process| {
                (
                    process.run_time() as f64,
                    MemoryUsage {
                        rss: process.memory(),
                        virtual_memory: process.virtual_memory(),
                    },
                )
            })
        });

        match sampled {
            Some((uptime, memory)) => Self {
                uptime,
                memory_usage: Some(memory),
                cwd,
            },
            None => Self {
                uptime: FIRST_CAPTURE.elapsed().as_secs_f64(),
                memory_usage: None,
                cwd,
            },
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("uptime".into(), json!(self.uptime));
        if let Some(memory) = &self.memory_usage {
            map.insert(
                "memoryUsage".into(),
                json!({ "rss": memory.rss, "virtual": memory.virtual_memory }),
            );
        }
        if let Some(cwd) = &self.cwd {
            map.insert("cwd".into(), Value::String(cwd.clone()));
        }
        Value::Object(map)
    }
}

/// Structured snapshot of one failure
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub message: String,
    pub name: String,
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub code: Option<Value>,
    pub data: Option<Value>,
    pub cause: Option<Value>,
    pub error_type: String,
    pub process: ProcessInfo,
    pub full_report: Option<String>,
    pub location: Option<SourceLocation>,
}

impl ErrorReport {
    /// Builds a report stamped with the current time and process state
    pub fn capture(failure: &Failure, location: Option<SourceLocation>) -> Self {
        Self::from_failure(failure, location, Utc::now(), ProcessInfo::capture())
    }

    /// Builds a report from explicit time and process values
    pub fn from_failure(
        failure: &Failure,
        location: Option<SourceLocation>,
        timestamp: DateTime<Utc>,
        process: ProcessInfo,
    ) -> Self {
        let mut report = Self {
            message: String::new(),
            name: "Error".to_string(),
            stack: None,
            timestamp,
            code: None,
            data: None,
            cause: None,
            error_type: "Error".to_string(),
            process,
            full_report: None,
            location,
        };

        match failure {
            Failure::Text(text) => {
                report.message = text.lines().next().unwrap_or_default().trim().to_string();
                report.stack = Some(text.clone()).filter(|s| !s.is_empty());
                report.error_type = "String".to_string();
            }
            Failure::Error(error) => {
                report.message = error.message.clone().unwrap_or_default();
                report.name = error.name.clone().unwrap_or_else(|| "Error".to_string());
                report.error_type = error.type_name.clone().unwrap_or_else(|| report.name.clone());
                report.stack = error.stack.clone();
                report.full_report = error.full_report.clone();
                report.code = error.code.clone();
                report.data = error.data.clone();
                report.cause = error.cause.clone();
            }
            Failure::Value(Value::Object(map)) => {
                let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
                report.message = match map.get("message") {
                    Some(Value::String(message)) => message.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                report.name = text("name").unwrap_or_else(|| "Error".to_string());
                report.error_type = text("type").unwrap_or_else(|| "Object".to_string());
                report.stack = text("stack");
                report.full_report = text("fullReport");
                // `get().cloned()` keeps an explicit `null` distinct from a missing key.
                report.code = map.get("code").cloned();
                report.data = map.get("data").cloned();
                report.cause = map.get("cause").cloned();
            }
            Failure::Value(Value::String(message)) => {
                report.message = message.clone();
                report.error_type = "String".to_string();
            }
            Failure::Value(other) => {
                report.message = other.to_string();
                report.error_type = json_type_name(other).to_string();
            }
        }

        report
    }

    /// JSON form of the report. Absent optional fields are omitted.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("message".into(), Value::String(self.message.clone()));
        map.insert("name".into(), Value::String(self.name.clone()));
        if let Some(stack) = &self.stack {
            map.insert("stack".into(), Value::String(stack.clone()));
        }
        map.insert(
            "timestamp".into(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        for (key, value) in [("code", &self.code), ("data", &self.data), ("cause", &self.cause)] {
            if let Some(value) = value {
                map.insert(key.into(), value.clone());
            }
        }
        map.insert("type".into(), Value::String(self.error_type.clone()));
        map.insert("process".into(), self.process.to_value());
        if let Some(full_report) = &self.full_report {
            map.insert("fullReport".into(), Value::String(full_report.clone()));
        }
        if let Some(location) = &self.location {
            map.insert(
                "reportLocation".into(),
                json!({
                    "file": location.file,
                    "line": location.line,
                    "column": location.column,
                    "frameText": location.frame_text,
                }),
            );
        }
        Value::Object(map)
    }
}

/// Drops the leading frames of a rendered backtrace up to the first one
/// outside the capture machinery. Unrecognised layouts are returned as-is.
pub(crate) fn trim_capture_frames(backtrace: &str) -> String {
    let mut frames: Vec<Vec<&str>> = Vec::new();
    for line in backtrace.lines() {
        match frames.last_mut() {
            Some(frame) if frame_symbol(line).is_none() => frame.push(line),
            _ => frames.push(vec![line]),
        }
    }

    let is_capture_frame = |frame: &Vec<&str>| {
        frame
            .first()
            .and_then(|header| frame_symbol(header))
            .map_or(false, |symbol| CAPTURE_FRAME_PREFIXES.iter().any(|p| symbol.starts_with(p)))
    };

    match frames.iter().position(|frame| !is_capture_frame(frame)) {
        Some(first) if first > 0 => frames[first..].iter().flatten().copied().collect::<Vec<_>>().join("\n"),
        _ => backtrace.to_string(),
    }
}

/// Symbol of a `  N: symbol` frame header line
fn frame_symbol(line: &str) -> Option<&str> {
    let (index, symbol) = line.trim_start().split_once(": ")?;
    (!index.is_empty() && index.chars().all(|c| c.is_ascii_digit())).then(|| symbol.trim())
}

fn cause_chain(source: Option<&(dyn StdError + 'static)>) -> Option<Value> {
    let messages: Vec<String> = std::iter::successors(source, |err| (*err).source())
        .map(|err| err.to_string())
        .collect();

    messages.into_iter().rev().fold(None, |inner, message| {
        let mut node = Map::new();
        node.insert("message".into(), Value::String(message));
        if let Some(inner) = inner {
            node.insert("cause".into(), inner);
        }
        Some(Value::Object(node))
    })
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}
