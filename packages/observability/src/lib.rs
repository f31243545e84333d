//! # Observability
//!
//! Centralized logging layer for the card-relay workspace.
//!
//! ## Design
//!
//! Crates are **log producers**. They use the standard `tracing` macros and
//! never decide where the output goes. The binary calls
//! `observability::init_with_config()` once at startup, which installs:
//!
//! - a JSONL file layer writing one structured entry per line to
//!   `~/.card-relay/logs/relay.jsonl` (or `LogConfig::log_path`)
//! - an optional compact stderr layer for interactive runs
//!
//! Secret-bearing fields (`token`, `bot_token`, `api_hash`, ...) are redacted
//! before they reach the file.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "card-relay".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("ready");
//! }
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_writer::{CentralLogWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogEntry, REDACTED_FIELDS};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "card-relay").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.card-relay/logs/relay.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Central log file location.
///
/// Falls back to the working directory when no home directory is available.
pub fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".card-relay")
        .join("logs")
        .join("relay.jsonl")
}

/// Initialize the observability layer with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// If the log file cannot be opened, logging degrades to stderr only so a
/// read-only home directory never prevents a run.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let (json_layer, open_error) = match CentralLogWriter::new(&log_path) {
        Ok(writer) => (
            Some(
                JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
                    .with_filter(env_filter()),
            ),
            None,
        ),
        Err(err) => (None, Some(err)),
    };

    let stderr_layer = if config.also_stderr || open_error.is_some() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(std::io::stderr)
                .with_filter(env_filter()),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init();

    if installed.is_err() {
        // A subscriber is already set (tests, embedding); keep it.
        return;
    }

    match open_error {
        Some(err) => tracing::warn!(
            log_path = %log_path.display(),
            error = %err,
            "log file unavailable, logging to stderr only"
        ),
        None => tracing::debug!(
            log_path = %log_path.display(),
            service = %config.service_name,
            "observability initialized"
        ),
    }
}

/// Re-export tracing macros for convenience.
/// Services can use `observability::info!()` or `tracing::info!()`.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_default_log_path_under_card_relay_dir() {
        let path = default_log_path();
        assert!(path.ends_with(".card-relay/logs/relay.jsonl"));
    }
}
