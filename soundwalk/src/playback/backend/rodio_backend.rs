//! Audible output through rodio.
//!
//! The cpal output stream is not `Send`, so it lives on a dedicated thread
//! for as long as the backend exists. Voices only need the stream's mixer,
//! which is cheap to clone and thread-safe.

use std::io::Cursor;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStreamBuilder, Sink};

use super::{AudioBackend, OpenRequest, Voice};
use crate::error::PlaybackError;
use crate::provider::PayloadFetcher;

/// Backend playing decoded payloads on the default output device.
pub struct RodioBackend {
    mixer: Mixer,
    fetcher: Arc<dyn PayloadFetcher>,
    // Dropping this ends the output thread and closes the stream.
    _keepalive: mpsc::Sender<()>,
}

impl RodioBackend {
    /// Open the default output device.
    pub fn open_default(fetcher: Arc<dyn PayloadFetcher>) -> Result<Self, PlaybackError> {
        let (mixer_tx, mixer_rx) = mpsc::channel::<Result<Mixer, PlaybackError>>();
        let (keepalive, keepalive_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("soundwalk-audio".to_string())
            .spawn(move || {
                let mut stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = mixer_tx.send(Err(PlaybackError::Output(e.to_string())));
                        return;
                    }
                };
                stream.log_on_drop(false);
                let _ = mixer_tx.send(Ok(stream.mixer().clone()));

                // Blocks until every sender is dropped.
                while keepalive_rx.recv().is_ok() {}
                tracing::debug!("Audio output thread exiting");
            })
            .map_err(|e| PlaybackError::Output(format!("failed to spawn audio thread: {}", e)))?;

        let mixer = mixer_rx
            .recv()
            .map_err(|_| PlaybackError::Output("audio thread exited early".to_string()))??;

        tracing::info!("Audio output opened");
        Ok(Self {
            mixer,
            fetcher,
            _keepalive: keepalive,
        })
    }
}

impl AudioBackend for RodioBackend {
    fn open<'a>(
        &'a self,
        request: &'a OpenRequest,
    ) -> BoxFuture<'a, Result<Arc<dyn Voice>, PlaybackError>> {
        Box::pin(async move {
            let payload = self.fetcher.fetch(&request.url).await?;
            let mixer = self.mixer.clone();
            let looped = request.loop_whole;

            let sink = tokio::task::spawn_blocking(move || build_sink(&mixer, payload, looped))
                .await
                .map_err(|e| PlaybackError::Output(format!("decoder task failed: {}", e)))??;

            Ok(Arc::new(RodioVoice { sink }) as Arc<dyn Voice>)
        })
    }

    fn name(&self) -> &str {
        "rodio"
    }
}

fn build_sink(mixer: &Mixer, payload: Bytes, looped: bool) -> Result<Sink, PlaybackError> {
    let sink = Sink::connect_new(mixer);
    let cursor = Cursor::new(payload);
    if looped {
        let source = Decoder::new_looped(cursor)
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;
        sink.append(source);
    } else {
        let source = Decoder::new(cursor).map_err(|e| PlaybackError::Decode(e.to_string()))?;
        sink.append(source);
    }
    sink.pause();
    Ok(sink)
}

struct RodioVoice {
    sink: Sink,
}

impl Voice for RodioVoice {
    fn play(&self) {
        self.sink.play();
    }

    fn position(&self) -> Duration {
        self.sink.get_pos()
    }

    fn seek(&self, position: Duration) -> Result<(), PlaybackError> {
        self.sink
            .try_seek(position)
            .map_err(|e| PlaybackError::Output(format!("seek failed: {}", e)))
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }

    fn stop(&self) {
        self.sink.stop();
    }
}
