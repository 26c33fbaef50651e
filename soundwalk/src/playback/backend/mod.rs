//! Audio output abstraction.
//!
//! The player pool never talks to an audio device directly. It asks an
//! [`AudioBackend`] to open a [`Voice`] for a URL and then drives that voice
//! (seek, play, stop) itself. This keeps the trim and loop rules in one place
//! and lets tests script backend behaviour.
//!
//! # Implementors
//!
//! - [`SimulatedBackend`] - wall-clock voices, optionally fetching the payload
//! - `RodioBackend` - real output through rodio (feature `audio-output`)

#[cfg(feature = "audio-output")]
mod rodio_backend;
mod simulated;

#[cfg(feature = "audio-output")]
pub use rodio_backend::RodioBackend;
pub use simulated::{SimulatedBackend, SimulatedVoice};

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::PlaybackError;
use crate::model::RecordId;

/// Everything a backend needs to open one voice.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub record_id: RecordId,
    /// Resolved download URL of the payload.
    pub url: String,
    /// Wrap to the payload start at its natural end.
    pub loop_whole: bool,
}

/// One live playback stream.
///
/// Voices are returned paused. Methods take `&self`; implementations use
/// interior mutability so the pool and the position monitor can share one.
pub trait Voice: Send + Sync {
    /// Begin or resume output.
    fn play(&self);

    /// Current playback position.
    fn position(&self) -> Duration;

    /// Jump to an absolute position.
    fn seek(&self, position: Duration) -> Result<(), PlaybackError>;

    /// Whether the payload has played to its end.
    fn is_finished(&self) -> bool;

    /// Stop output and release the stream. Idempotent.
    fn stop(&self);
}

/// Opens voices for record payloads.
pub trait AudioBackend: Send + Sync {
    /// Fetch, decode and prepare a paused voice.
    fn open<'a>(
        &'a self,
        request: &'a OpenRequest,
    ) -> BoxFuture<'a, Result<Arc<dyn Voice>, PlaybackError>>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
