//! Error taxonomy for playback.
//!
//! Playback errors are always scoped to a single record. The tracking session
//! never lets one record's failure abort evaluation of the others; what varies
//! per kind is whether the record is retried on the next in-range tick.
//!
//! | Kind         | Retried | Surfaced to the user                |
//! |--------------|---------|-------------------------------------|
//! | `Permission` | yes     | once per session (`PermissionDenied`) |
//! | `Network`    | yes     | never                               |
//! | `Timeout`    | yes     | never                               |
//! | `Decode`     | no      | never                               |
//! | `Output`     | yes     | never                               |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while starting playback of a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    /// Device or audio permission was not granted.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The audio payload could not be fetched.
    #[error("network error: {0}")]
    Network(String),

    /// Playback did not become ready in time.
    #[error("playback not ready after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The payload was fetched but cannot be played.
    #[error("unplayable payload: {0}")]
    Decode(String),

    /// The audio output device rejected the stream.
    #[error("audio output error: {0}")]
    Output(String),
}

impl PlaybackError {
    /// Whether the record should be attempted again on a later tick.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PlaybackError::Decode(_))
    }

    /// Short machine-friendly label, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackError::Permission(_) => "permission",
            PlaybackError::Network(_) => "network",
            PlaybackError::Timeout(_) => "timeout",
            PlaybackError::Decode(_) => "decode",
            PlaybackError::Output(_) => "output",
        }
    }
}
