//! CLI error type.

use std::fmt;

use soundwalk::catalog::CatalogError;
use soundwalk::config::ConfigError;
use soundwalk::error::PlaybackError;
use soundwalk::location::RouteError;
use soundwalk::logging::LoggingError;
use soundwalk::provider::ProviderError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration or argument error.
    Config(String),

    /// Failed to talk to the work API.
    Provider(ProviderError),

    /// Failed to open or sync a work.
    Catalog(CatalogError),

    /// The route file could not be loaded.
    Route(RouteError),

    /// Audio output could not be opened.
    Audio(PlaybackError),

    /// Logging could not be initialized.
    Logging(LoggingError),

    /// Failed to create the Tokio runtime.
    Runtime(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Provider(e) => write!(f, "API request failed: {}", e),
            CliError::Catalog(e) => match e {
                CatalogError::Provider(_) | CatalogError::Store(_) => {
                    write!(f, "{}: {}", e.notice(), e)
                }
                _ => write!(f, "{}", e.notice()),
            },
            CliError::Route(e) => write!(f, "Invalid route: {}", e),
            CliError::Audio(e) => write!(f, "Audio output unavailable: {}", e),
            CliError::Logging(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Runtime(msg) => write!(f, "Failed to create Tokio runtime: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Provider(e) => Some(e),
            CliError::Catalog(e) => Some(e),
            CliError::Route(e) => Some(e),
            CliError::Audio(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Config(_) | CliError::Runtime(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<ProviderError> for CliError {
    fn from(e: ProviderError) -> Self {
        CliError::Provider(e)
    }
}

impl From<CatalogError> for CliError {
    fn from(e: CatalogError) -> Self {
        CliError::Catalog(e)
    }
}

impl From<RouteError> for CliError {
    fn from(e: RouteError) -> Self {
        CliError::Route(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}
