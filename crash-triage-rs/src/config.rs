//! # Settings
//!
//! Tracker and logging settings, loaded from an optional file and
//! `CRASH_TRIAGE_*` environment variables (`__` separates sections, e.g.
//! `CRASH_TRIAGE_TRACKER__TOKEN`). A `.env` file is honoured.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::types::Result;

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "CRASH_TRIAGE";

/// Label every automated report carries; also the listing filter
pub const DEFAULT_SEARCH_LABEL: &str = "automated-error";

/// Configuration for the issue tracker and the report handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// API token for the tracker
    pub token: Option<String>,
    /// Repository owner; discovered from git when absent
    pub owner: Option<String>,
    /// Repository name; discovered from git when absent
    pub repo: Option<String>,
    /// Build or commit identifier; discovered from git when absent
    pub build_id: Option<String>,
    /// Base URL of the REST API
    pub api_base_url: String,
    /// Labels applied to newly created items
    pub labels: Vec<String>,
    /// Label used to list existing automated reports
    pub search_label: String,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
    /// Maximum listing pages fetched per report
    pub max_pages: u32,
    /// Capacity of the in-process report queue
    pub queue_capacity: usize,
    /// Extra substrings marking frames the locator must skip
    pub extra_noise_markers: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            token: None,
            owner: None,
            repo: None,
            build_id: None,
            api_base_url: "https://api.github.com".to_string(),
            labels: vec![DEFAULT_SEARCH_LABEL.to_string(), "bug".to_string()],
            search_label: DEFAULT_SEARCH_LABEL.to_string(),
            timeout_secs: 30,
            max_pages: 10,
            queue_capacity: 64,
            extra_noise_markers: Vec::new(),
        }
    }
}

impl TryFrom<config::Config> for TrackerConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = TrackerConfig::default();

        if let Ok(token) = cfg.get::<String>("tracker.token") {
            base.token = Some(token);
        }
        if let Ok(owner) = cfg.get::<String>("tracker.owner") {
            base.owner = Some(owner);
        }
        if let Ok(repo) = cfg.get::<String>("tracker.repo") {
            base.repo = Some(repo);
        }
        if let Ok(build_id) = cfg.get::<String>("tracker.build_id") {
            base.build_id = Some(build_id);
        }
        if let Ok(url) = cfg.get::<String>("tracker.api_base_url") {
            base.api_base_url = url;
        }
        if let Ok(labels) = cfg.get::<Vec<String>>("tracker.labels") {
            base.labels = labels;
        }
        if let Ok(label) = cfg.get::<String>("tracker.search_label") {
            base.search_label = label;
        }
        if let Ok(timeout) = cfg.get::<u64>("tracker.timeout_secs") {
            base.timeout_secs = timeout;
        }
        if let Ok(max_pages) = cfg.get::<u32>("tracker.max_pages") {
            base.max_pages = max_pages;
        }
        if let Ok(capacity) = cfg.get::<usize>("tracker.queue_capacity") {
            base.queue_capacity = capacity;
        }
        if let Ok(markers) = cfg.get::<Vec<String>>("tracker.extra_noise_markers") {
            base.extra_noise_markers = markers;
        }

        Ok(base)
    }
}

/// All settings of the pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
}

impl TryFrom<config::Config> for Settings {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            tracker: TrackerConfig::try_from(cfg.clone())?,
            logging: LoggingConfig::try_from(cfg)?,
        })
    }
}

/// Loads settings from `.env`, an optional config file and the environment
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    dotenv::dotenv().ok();

    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let cfg = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("tracker.labels")
                .with_list_parse_key("tracker.extra_noise_markers")
                .try_parsing(true),
        )
        .build()?;

    Ok(Settings::try_from(cfg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let tracker = TrackerConfig::default();
        assert_eq!(tracker.api_base_url, "https://api.github.com");
        assert_eq!(tracker.labels, vec!["automated-error", "bug"]);
        assert_eq!(tracker.search_label, "automated-error");
        assert!(tracker.token.is_none());
    }

    #[test]
    fn test_overrides_from_config() {
        let cfg = config::Config::builder()
            .set_override("tracker.owner", "acme")
            .and_then(|b| b.set_override("tracker.max_pages", 3))
            .and_then(|b| b.set_override("tracker.labels", vec!["crash"]))
            .and_then(|b| b.build())
            .expect("config builds");

        let tracker = TrackerConfig::try_from(cfg).expect("tracker config");
        assert_eq!(tracker.owner.as_deref(), Some("acme"));
        assert_eq!(tracker.max_pages, 3);
        assert_eq!(tracker.labels, vec!["crash"]);
        assert_eq!(tracker.timeout_secs, 30);
    }

    #[test]
    fn test_load_settings_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "[tracker]\nowner = \"acme\"\nrepo = \"widgets\"\nbuild_id = \"abc123\"\n\n[logging]\nlevel = \"debug\""
        )
        .expect("write config");

        let settings = load_settings(Some(file.path())).expect("settings load");
        assert_eq!(settings.tracker.owner.as_deref(), Some("acme"));
        assert_eq!(settings.tracker.repo.as_deref(), Some("widgets"));
        assert_eq!(settings.tracker.build_id.as_deref(), Some("abc123"));
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_settings(Some(Path::new("/definitely/not/here.toml")));
        assert!(result.is_err());
    }
}
