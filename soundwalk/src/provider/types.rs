//! Provider error type.

use thiserror::Error;

/// Errors raised while talking to the soundwalk API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport-level failure (connect, TLS, body read).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The API envelope carried a non-200 code.
    #[error("API returned code {code}{}", .message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
    Api { code: i64, message: Option<String> },

    /// The body could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ProviderError {
    /// Whether the server refused access to the resource.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, ProviderError::Status { status: 401 | 403, .. })
    }
}
