//! # Structured Logging
//!
//! Installs the global `tracing` subscriber used by the handler, the issue
//! store and the CLI.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::types::{Error, ErrorKind, Result};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
    /// Whether to also write logs to a daily-rolling file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    /// Log file name prefix
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_output: false,
            log_dir: None,
            file_name: "crash-triage.log".to_string(),
        }
    }
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }
        if let Ok(file_name) = cfg.get::<String>("logging.file_name") {
            base.file_name = file_name;
        }

        Ok(base)
    }
}

/// Initializes the structured logging system. Later calls are no-ops.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.level)));

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .with_span_list(true)
    });

    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true).with_thread_names(true));

    let file_layer = match (config.file_output, config.log_dir.as_deref()) {
        (true, Some(log_dir)) => {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, &config.file_name);
            let (non_blocking, guard) = NonBlocking::new(file_appender);

            // The guard flushes on drop; keep it for the lifetime of the program.
            Box::leak(Box::new(guard));

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        _ => None,
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        Error::new(
            ErrorKind::Configuration,
            format!("Failed to set global subscriber: {}", e),
        )
    })?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        level = %config.level,
        json = %config.json_format,
        file_output = %config.file_output,
        "Structured logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_from_config() {
        let cfg = config::Config::builder()
            .set_override("logging.level", "debug")
            .and_then(|b| b.set_override("logging.json_format", true))
            .and_then(|b| b.build())
            .expect("config builds");

        let logging = LoggingConfig::try_from(cfg).expect("logging config");
        assert_eq!(logging.level, "debug");
        assert!(logging.json_format);
        assert!(!logging.file_output);
        assert_eq!(logging.file_name, "crash-triage.log");
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_logging(None).is_ok());
        assert!(init_logging(Some(LoggingConfig::default())).is_ok());
    }
}
