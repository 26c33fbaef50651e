//! Logging setup.
//!
//! Events go to stderr and, when a directory is configured, to a daily
//! rolling file written through a non-blocking appender. `RUST_LOG`
//! overrides the configured level.
//!
//! Keep the returned [`WorkerGuard`] alive for the life of the process;
//! dropping it flushes and closes the log file.

use std::path::PathBuf;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// File name prefix of the rolling log.
pub const LOG_FILE_NAME: &str = "soundwalk.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("logging already initialized: {0}")]
    Init(String),
}

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for the rolling log file; `None` logs to stderr only.
    pub directory: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            ansi: true,
        }
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            directory: Some(settings.directory.clone()),
            ansi: true,
        }
    }
}

/// Filter directives applied when `RUST_LOG` is unset.
pub fn default_directives(level: &str) -> String {
    format!("soundwalk={level},soundwalk_cli={level}")
}

fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives(level))
            .map_err(|e| LoggingError::Filter(e.to_string())),
    }
}

fn timer() -> OffsetTime<Rfc3339> {
    OffsetTime::local_rfc_3339().unwrap_or_else(|_| OffsetTime::new(UtcOffset::UTC, Rfc3339))
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = build_filter(&config.level)?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(timer())
        .with_ansi(config.ansi)
        .with_target(false);

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
                path: dir.display().to_string(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_timer(timer())
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cover_both_crates() {
        assert_eq!(
            default_directives("debug"),
            "soundwalk=debug,soundwalk_cli=debug"
        );
    }

    #[test]
    fn test_config_from_settings() {
        let settings = LoggingSettings {
            directory: PathBuf::from("/tmp/logs"),
            level: "warn".into(),
        };
        let config = LoggingConfig::from(&settings);
        assert_eq!(config.level, "warn");
        assert_eq!(config.directory, Some(PathBuf::from("/tmp/logs")));
    }
}
