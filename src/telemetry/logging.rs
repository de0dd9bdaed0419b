//! Logging configuration and initialization.
//!
//! JSON output by default so enforcement decisions and fallback warnings
//! land in the log pipeline as structured records; pretty printing for
//! local development. Configuration comes from `MG_LOG_*` environment
//! variables, with invalid values falling back to defaults.

use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logging (default for production).
    #[default]
    Json,
    /// Human-readable pretty printing (for development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (JSON or Pretty).
    pub format: LogFormat,
    /// Log level filter (e.g., "info", "materna_guard=debug").
    pub level: String,
    /// Optional file path for log output. If None, logs to stderr.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: None,
        }
    }
}

impl LogConfig {
    /// Load from `MG_LOG_FORMAT`, `MG_LOG_LEVEL`, and `MG_LOG_FILE`.
    ///
    /// Unknown format values fall back to JSON; the level string is
    /// validated later by `init_logging`.
    pub fn from_env() -> Self {
        let format = match std::env::var("MG_LOG_FORMAT").as_deref() {
            Ok("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };
        Self {
            format,
            level: std::env::var("MG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            output_path: std::env::var("MG_LOG_FILE").ok().map(PathBuf::from),
        }
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Failed to open log file: {0}")]
    FileOpen(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

/// Initialize the tracing subscriber with the given configuration.
///
/// This should be called once at application startup.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| LogError::InvalidFilter(e.to_string()))?;

    match config.format {
        LogFormat::Json => init_json_subscriber(filter, &config.output_path),
        LogFormat::Pretty => init_pretty_subscriber(filter),
    }
}

fn init_json_subscriber(filter: EnvFilter, path: &Option<PathBuf>) -> Result<(), LogError> {
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(path) = path {
        let file = std::fs::File::create(path)
            .map_err(|e| LogError::FileOpen(e.to_string()))?;
        registry
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;
    } else {
        registry
            .with(fmt::layer().json())
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;
    }

    Ok(())
}

fn init_pretty_subscriber(filter: EnvFilter) -> Result<(), LogError> {
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().pretty())
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_defaults() {
        std::env::remove_var("MG_LOG_FORMAT");
        std::env::remove_var("MG_LOG_LEVEL");
        std::env::remove_var("MG_LOG_FILE");
        let config = LogConfig::from_env();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
        assert!(config.output_path.is_none());
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LogConfig {
            level: "not==a==filter".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(LogError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_json_logging_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.log");
        let config = LogConfig {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: Some(path.clone()),
        };
        // First init in the test binary wins; a prior init in another
        // test is the only acceptable failure.
        match init_logging(&config) {
            Ok(()) => {
                tracing::info!("arquivo de log criado");
                assert!(path.exists());
            }
            Err(LogError::AlreadyInitialized) => {}
            Err(e) => panic!("unexpected init error: {e}"),
        }
    }
}
