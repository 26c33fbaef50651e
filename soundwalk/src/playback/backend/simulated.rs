//! Silent backend that plays by the clock.
//!
//! Used for dry runs and headless builds. When constructed with a payload
//! fetcher it still downloads every payload, so network and permission
//! failures surface exactly as they would with real output.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{AudioBackend, OpenRequest, Voice};
use crate::error::PlaybackError;
use crate::provider::PayloadFetcher;

/// Default nominal length of a simulated payload.
pub const DEFAULT_SIMULATED_LENGTH: Duration = Duration::from_secs(180);

/// Backend producing [`SimulatedVoice`]s.
pub struct SimulatedBackend {
    fetcher: Option<Arc<dyn PayloadFetcher>>,
    length: Duration,
}

impl SimulatedBackend {
    /// A backend that never touches the network.
    pub fn offline() -> Self {
        Self {
            fetcher: None,
            length: DEFAULT_SIMULATED_LENGTH,
        }
    }

    /// A backend that downloads each payload before "playing" it.
    pub fn with_fetcher(fetcher: Arc<dyn PayloadFetcher>) -> Self {
        Self {
            fetcher: Some(fetcher),
            length: DEFAULT_SIMULATED_LENGTH,
        }
    }

    /// Set the nominal payload length.
    pub fn with_length(mut self, length: Duration) -> Self {
        self.length = length;
        self
    }
}

impl AudioBackend for SimulatedBackend {
    fn open<'a>(
        &'a self,
        request: &'a OpenRequest,
    ) -> BoxFuture<'a, Result<Arc<dyn Voice>, PlaybackError>> {
        Box::pin(async move {
            if let Some(fetcher) = &self.fetcher {
                let payload = fetcher.fetch(&request.url).await?;
                if payload.is_empty() {
                    return Err(PlaybackError::Decode("empty payload".to_string()));
                }
                tracing::debug!(
                    record_id = %request.record_id,
                    bytes = payload.len(),
                    "Simulated voice payload fetched"
                );
            }
            let voice = SimulatedVoice::new(self.length, request.loop_whole);
            Ok(Arc::new(voice) as Arc<dyn Voice>)
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[derive(Debug)]
struct Clock {
    /// Position when the clock was last (re)anchored.
    base: Duration,
    /// When playback resumed; `None` while paused or stopped.
    resumed_at: Option<Instant>,
    stopped: bool,
}

/// A voice whose position advances with the tokio clock.
#[derive(Debug)]
pub struct SimulatedVoice {
    length: Duration,
    looped: bool,
    clock: Mutex<Clock>,
}

impl SimulatedVoice {
    /// Create a paused voice of the given length.
    pub fn new(length: Duration, looped: bool) -> Self {
        Self {
            length,
            looped,
            clock: Mutex::new(Clock {
                base: Duration::ZERO,
                resumed_at: None,
                stopped: false,
            }),
        }
    }

    fn raw_position(clock: &Clock) -> Duration {
        match clock.resumed_at {
            Some(at) => clock.base + at.elapsed(),
            None => clock.base,
        }
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.clock.lock().stopped
    }
}

impl Voice for SimulatedVoice {
    fn play(&self) {
        let mut clock = self.clock.lock();
        if !clock.stopped && clock.resumed_at.is_none() {
            clock.resumed_at = Some(Instant::now());
        }
    }

    fn position(&self) -> Duration {
        let clock = self.clock.lock();
        let raw = Self::raw_position(&clock);
        if self.looped && !self.length.is_zero() {
            Duration::from_nanos((raw.as_nanos() % self.length.as_nanos()) as u64)
        } else {
            raw.min(self.length)
        }
    }

    fn seek(&self, position: Duration) -> Result<(), PlaybackError> {
        if position > self.length {
            return Err(PlaybackError::Decode(format!(
                "seek to {:?} beyond length {:?}",
                position, self.length
            )));
        }
        let mut clock = self.clock.lock();
        clock.base = position;
        if clock.resumed_at.is_some() {
            clock.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        let clock = self.clock.lock();
        clock.stopped || (!self.looped && Self::raw_position(&clock) >= self.length)
    }

    fn stop(&self) {
        let mut clock = self.clock.lock();
        clock.base = Self::raw_position(&clock);
        clock.resumed_at = None;
        clock.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_voice_advances_only_while_playing() {
        let voice = SimulatedVoice::new(Duration::from_secs(60), false);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(voice.position(), Duration::ZERO);

        voice.play();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(voice.position(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_seek_and_finish() {
        let voice = SimulatedVoice::new(Duration::from_secs(10), false);
        voice.seek(Duration::from_secs(8)).unwrap();
        voice.play();
        assert!(!voice.is_finished());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(voice.is_finished());
        assert_eq!(voice.position(), Duration::from_secs(10));

        assert!(voice.seek(Duration::from_secs(11)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_looped_voice_never_finishes() {
        let voice = SimulatedVoice::new(Duration::from_secs(10), true);
        voice.play();
        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(!voice.is_finished());
        assert_eq!(voice.position(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let voice = SimulatedVoice::new(Duration::from_secs(10), false);
        voice.play();
        voice.stop();
        voice.stop();
        assert!(voice.is_stopped());
        assert!(voice.is_finished());
    }

    #[tokio::test]
    async fn test_offline_backend_opens_paused_voice() {
        let backend = SimulatedBackend::offline().with_length(Duration::from_secs(3));
        let request = OpenRequest {
            record_id: "r".into(),
            url: "http://localhost/none".into(),
            loop_whole: false,
        };
        let voice = backend.open(&request).await.unwrap();
        assert_eq!(voice.position(), Duration::ZERO);
        assert_eq!(backend.name(), "simulated");
    }
}
