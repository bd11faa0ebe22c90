//! # Report Fingerprinting
//!
//! Maps an error report to a SHA-256 content hash used as the dedup key.
//! Volatile fields are stripped first, then the remaining tree is rendered
//! as canonical JSON (sorted keys, no whitespace) so that two reports of
//! the same fault hash identically regardless of key order or when and
//! where they were captured.

use std::collections::HashSet;
use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::report::ErrorReport;

/// Keys that never contribute to a fingerprint. `process` goes as a whole group.
pub const VOLATILE_KEYS: &[&str] = &["timestamp", "uptime", "memoryUsage", "cwd", "process"];

/// Nesting depth after which subtrees are replaced by [`DEPTH_LIMIT_MARKER`]
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Stand-in for subtrees deeper than the configured limit
pub const DEPTH_LIMIT_MARKER: &str = "[depth limit]";

/// Lowercase hex SHA-256 digest identifying one underlying fault
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps an existing digest, e.g. one read back from a tracked item
    pub fn from_hex<S: Into<String>>(hex: S) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hidden-comment marker that embeds the fingerprint in an issue body
    pub fn marker(&self) -> String {
        format!("<!-- hash: {} -->", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes fingerprints over a fixed set of volatile keys
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    volatile_keys: HashSet<String>,
    max_depth: usize,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(VOLATILE_KEYS)
    }
}

impl Fingerprinter {
    /// Creates a fingerprinter ignoring the given keys
    pub fn new<I, S>(volatile_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            volatile_keys: volatile_keys.into_iter().map(|k| k.as_ref().to_string()).collect(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Overrides the nesting depth limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Fingerprints a report
    pub fn fingerprint(&self, report: &ErrorReport) -> Fingerprint {
        self.fingerprint_value(&report.to_value())
    }

    /// Fingerprints an arbitrary JSON document
    pub fn fingerprint_value(&self, value: &Value) -> Fingerprint {
        let canonical = canonical_json(&self.strip_volatile(value));
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    /// Returns a copy of `value` with every volatile key removed, at any depth
    pub fn strip_volatile(&self, value: &Value) -> Value {
        self.strip(value, 0)
    }

    fn strip(&self, value: &Value, depth: usize) -> Value {
        match value {
            Value::Array(_) | Value::Object(_) if depth >= self.max_depth => {
                Value::String(DEPTH_LIMIT_MARKER.to_string())
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.strip(v, depth + 1)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(key, _)| !self.volatile_keys.contains(key.as_str()))
                    .map(|(key, v)| (key.clone(), self.strip(v, depth + 1)))
                    .collect::<Map<String, Value>>(),
            ),
            scalar => scalar.clone(),
        }
    }
}

/// Renders `value` as JSON with keys sorted by code point and no whitespace
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            // UTF-8 byte order equals code point order.
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

/// Fingerprints a report with the default volatile key set
pub fn fingerprint(report: &ErrorReport) -> Fingerprint {
    Fingerprinter::default().fingerprint(report)
}
