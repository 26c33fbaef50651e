//! Player pool: at most one playback handle per record.
//!
//! The pool owns every live [`Voice`]. Each record id maps to a [`Slot`] that
//! is checked and replaced under a single lock, so two concurrent `start`
//! calls for the same record never open two voices: the first caller leads
//! the load, later callers wait on the leader's outcome.
//!
//! Every load carries an operation number. A `stop` removes the slot and
//! cancels the load; when the load resolves it re-checks that its operation
//! still owns the slot and otherwise releases the voice and reports
//! [`StartOutcome::Superseded`]. Stops always win over starts.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::backend::{AudioBackend, OpenRequest, Voice};
use super::state::PlaybackState;
use crate::error::PlaybackError;
use crate::events::{publish, EventSender, TrackingEvent};
use crate::model::{AudioRecord, RecordId};
use crate::provider::DownloadUrlFactory;

/// Default bound on fetching and decoding one payload.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(12);

/// Default period of the trim/finish position monitor.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(250);

/// Pool tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub start_timeout: Duration,
    pub monitor_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            start_timeout: DEFAULT_START_TIMEOUT,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }
}

/// How a successful `start` call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A voice was opened and is now playing.
    Started,
    /// The record was already playing; nothing changed.
    AlreadyPlaying,
    /// The load was stopped before it could begin playing.
    Superseded,
}

type Outcome = Result<StartOutcome, PlaybackError>;

enum Slot {
    Loading {
        op: u64,
        cancel: CancellationToken,
        done: watch::Receiver<Option<Outcome>>,
    },
    Playing {
        op: u64,
        voice: Arc<dyn Voice>,
        monitor: CancellationToken,
    },
    Failed {
        error: PlaybackError,
    },
}

impl Slot {
    fn state(&self) -> PlaybackState {
        match self {
            Slot::Loading { .. } => PlaybackState::Loading,
            Slot::Playing { .. } => PlaybackState::Playing,
            Slot::Failed { .. } => PlaybackState::Error,
        }
    }

    fn is_loading_op(&self, expected: u64) -> bool {
        matches!(self, Slot::Loading { op, .. } if *op == expected)
    }

    fn is_playing_op(&self, expected: u64) -> bool {
        matches!(self, Slot::Playing { op, .. } if *op == expected)
    }
}

enum Entry {
    Join(watch::Receiver<Option<Outcome>>),
    Lead {
        op: u64,
        cancel: CancellationToken,
        done: watch::Sender<Option<Outcome>>,
    },
}

/// Owns all playback handles, keyed by record id.
pub struct AudioPlayerPool {
    backend: Arc<dyn AudioBackend>,
    urls: Arc<dyn DownloadUrlFactory>,
    session_id: String,
    config: PoolConfig,
    slots: Mutex<HashMap<RecordId, Slot>>,
    url_cache: DashMap<RecordId, String>,
    next_op: AtomicU64,
    events: EventSender,
}

impl AudioPlayerPool {
    /// Create a pool for one work session.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        urls: Arc<dyn DownloadUrlFactory>,
        session_id: impl Into<String>,
        config: PoolConfig,
        events: EventSender,
    ) -> Self {
        Self {
            backend,
            urls,
            session_id: session_id.into(),
            config,
            slots: Mutex::new(HashMap::new()),
            url_cache: DashMap::new(),
            next_op: AtomicU64::new(0),
            events,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start playback of a record.
    ///
    /// Returns immediately with `AlreadyPlaying` if a voice exists. If a load
    /// is in flight, waits for it and returns its outcome. Otherwise leads a
    /// new load bounded by `start_timeout`.
    pub async fn start(self: &Arc<Self>, record: &AudioRecord) -> Outcome {
        let id = record.record_id.clone();

        let entry = {
            let mut slots = self.slots.lock();
            let joined = match slots.get(&id) {
                Some(Slot::Playing { .. }) => return Ok(StartOutcome::AlreadyPlaying),
                Some(Slot::Loading { done, .. }) => Some(done.clone()),
                _ => None,
            };
            match joined {
                Some(done) => Entry::Join(done),
                None => {
                    let op = self.next_op.fetch_add(1, Ordering::Relaxed) + 1;
                    let cancel = CancellationToken::new();
                    let (tx, rx) = watch::channel(None);
                    slots.insert(
                        id.clone(),
                        Slot::Loading {
                            op,
                            cancel: cancel.clone(),
                            done: rx,
                        },
                    );
                    Entry::Lead {
                        op,
                        cancel,
                        done: tx,
                    }
                }
            }
        };

        match entry {
            Entry::Join(done) => {
                tracing::debug!(record_id = %id, "Start coalesced with in-flight load");
                Self::join(done).await
            }
            Entry::Lead { op, cancel, done } => {
                publish(
                    &self.events,
                    TrackingEvent::PlaybackStateChanged {
                        record_id: id.clone(),
                        state: PlaybackState::Loading,
                    },
                );

                let mut guard = LoadGuard {
                    pool: self,
                    record_id: &id,
                    op,
                    armed: true,
                };
                let outcome = self.load(record, op, &cancel).await;
                guard.armed = false;

                done.send_replace(Some(outcome.clone()));
                outcome
            }
        }
    }

    async fn join(mut done: watch::Receiver<Option<Outcome>>) -> Outcome {
        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            // Leader dropped without reporting.
            Err(_) => None,
        };
        outcome.unwrap_or(Ok(StartOutcome::Superseded))
    }

    async fn load(
        self: &Arc<Self>,
        record: &AudioRecord,
        op: u64,
        cancel: &CancellationToken,
    ) -> Outcome {
        let id = &record.record_id;
        let request = OpenRequest {
            record_id: id.clone(),
            url: self.resolve_url(id),
            loop_whole: record.looped,
        };

        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(record_id = %id, "Load cancelled");
                return Ok(StartOutcome::Superseded);
            }
            res = tokio::time::timeout(self.config.start_timeout, self.backend.open(&request)) => res,
        };

        let voice = match opened {
            Ok(Ok(voice)) => voice,
            Ok(Err(e)) => return self.fail(id, op, e),
            Err(_) => return self.fail(id, op, PlaybackError::Timeout(self.config.start_timeout)),
        };

        let start = record.start_offset();
        if !start.is_zero() {
            if let Err(e) = voice.seek(start) {
                tracing::warn!(record_id = %id, error = %e, "Failed to seek to trim start");
            }
        }

        let monitor = CancellationToken::new();
        let committed = {
            let mut slots = self.slots.lock();
            let current = slots.get(id).is_some_and(|s| s.is_loading_op(op));
            if current && !cancel.is_cancelled() {
                voice.play();
                slots.insert(
                    id.clone(),
                    Slot::Playing {
                        op,
                        voice: Arc::clone(&voice),
                        monitor: monitor.clone(),
                    },
                );
                true
            } else {
                false
            }
        };

        if !committed {
            voice.stop();
            tracing::debug!(record_id = %id, "Load superseded, voice released");
            return Ok(StartOutcome::Superseded);
        }

        self.spawn_monitor(record, op, voice, monitor);
        publish(
            &self.events,
            TrackingEvent::PlaybackStateChanged {
                record_id: id.clone(),
                state: PlaybackState::Playing,
            },
        );
        tracing::info!(
            record_id = %id,
            backend = self.backend.name(),
            start_ms = start.as_millis() as u64,
            "Playback started"
        );
        Ok(StartOutcome::Started)
    }

    fn fail(&self, id: &str, op: u64, error: PlaybackError) -> Outcome {
        let current = {
            let mut slots = self.slots.lock();
            if slots.get(id).is_some_and(|s| s.is_loading_op(op)) {
                slots.insert(
                    id.to_string(),
                    Slot::Failed {
                        error: error.clone(),
                    },
                );
                true
            } else {
                false
            }
        };

        if !current {
            tracing::debug!(record_id = %id, error = %error, "Load failed after stop");
            return Ok(StartOutcome::Superseded);
        }

        tracing::warn!(
            record_id = %id,
            kind = error.kind(),
            error = %error,
            "Playback start failed"
        );
        publish(
            &self.events,
            TrackingEvent::PlaybackStateChanged {
                record_id: id.to_string(),
                state: PlaybackState::Error,
            },
        );
        Err(error)
    }

    fn spawn_monitor(
        self: &Arc<Self>,
        record: &AudioRecord,
        op: u64,
        voice: Arc<dyn Voice>,
        token: CancellationToken,
    ) {
        let pool: Weak<Self> = Arc::downgrade(self);
        let id = record.record_id.clone();
        let start = record.start_offset();
        let end = record.end_offset();
        let looped = record.looped;
        let period = self.config.monitor_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let position = voice.position();
                // A looped payload shorter than its end trim wraps to zero.
                if looped && position < start {
                    if let Err(e) = voice.seek(start) {
                        tracing::warn!(record_id = %id, error = %e, "Loop seek failed");
                    }
                    continue;
                }

                if let Some(end) = end {
                    if position >= end {
                        if looped {
                            if let Err(e) = voice.seek(start) {
                                tracing::warn!(record_id = %id, error = %e, "Loop seek failed");
                            }
                            continue;
                        }
                        tracing::debug!(record_id = %id, "Reached trim end");
                        break;
                    }
                }

                if voice.is_finished() {
                    tracing::debug!(record_id = %id, "Playback finished");
                    break;
                }
            }

            if !token.is_cancelled() {
                match pool.upgrade() {
                    Some(pool) => {
                        pool.release(&id, op);
                    }
                    None => voice.stop(),
                }
            }
        });
    }

    /// Release a voice only if it still belongs to operation `op`.
    fn release(&self, record_id: &str, op: u64) -> bool {
        let removed = {
            let mut slots = self.slots.lock();
            if slots.get(record_id).is_some_and(|s| s.is_playing_op(op)) {
                slots.remove(record_id)
            } else {
                None
            }
        };
        match removed {
            Some(slot) => self.dispose(record_id, slot),
            None => false,
        }
    }

    /// Stop a record. Idempotent; returns whether anything was active.
    ///
    /// An in-flight load is cancelled and its eventual voice released.
    pub fn stop(&self, record_id: &str) -> bool {
        let removed = self.slots.lock().remove(record_id);
        match removed {
            Some(slot) => self.dispose(record_id, slot),
            None => false,
        }
    }

    /// Stop every record. Returns how many were active.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(RecordId, Slot)> = self.slots.lock().drain().collect();
        let mut stopped = 0;
        for (id, slot) in drained {
            if self.dispose(&id, slot) {
                stopped += 1;
            }
        }
        if stopped > 0 {
            tracing::info!(stopped, "Stopped all playback");
        }
        stopped
    }

    fn dispose(&self, record_id: &str, slot: Slot) -> bool {
        let active = match slot {
            Slot::Loading { cancel, .. } => {
                cancel.cancel();
                tracing::debug!(record_id, "Cancelled in-flight load");
                true
            }
            Slot::Playing { voice, monitor, .. } => {
                monitor.cancel();
                voice.stop();
                tracing::debug!(record_id, "Stopped playback");
                true
            }
            Slot::Failed { .. } => false,
        };
        publish(
            &self.events,
            TrackingEvent::PlaybackStateChanged {
                record_id: record_id.to_string(),
                state: PlaybackState::Idle,
            },
        );
        active
    }

    /// Playback state of a record.
    pub fn state(&self, record_id: &str) -> PlaybackState {
        self.slots
            .lock()
            .get(record_id)
            .map(Slot::state)
            .unwrap_or_default()
    }

    /// Last start error of a record in the `Error` state.
    pub fn last_error(&self, record_id: &str) -> Option<PlaybackError> {
        match self.slots.lock().get(record_id) {
            Some(Slot::Failed { error }) => Some(error.clone()),
            _ => None,
        }
    }

    /// Current position of a playing record.
    pub fn position(&self, record_id: &str) -> Option<Duration> {
        match self.slots.lock().get(record_id) {
            Some(Slot::Playing { voice, .. }) => Some(voice.position()),
            _ => None,
        }
    }

    /// States of every record with a handle, sorted by id.
    pub fn snapshot(&self) -> Vec<(RecordId, PlaybackState)> {
        let mut states: Vec<_> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Records that are loading or playing.
    pub fn active_ids(&self) -> HashSet<RecordId> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.state().is_active())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Records that are audibly playing.
    pub fn playing_ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<_> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Playing { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn playing_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Playing { .. }))
            .count()
    }

    /// Download URL for a record, resolved once per pool.
    pub fn resolve_url(&self, record_id: &str) -> String {
        if let Some(url) = self.url_cache.get(record_id) {
            return url.clone();
        }
        let url = self.urls.download_url(&self.session_id, record_id);
        self.url_cache
            .entry(record_id.to_string())
            .or_insert(url)
            .clone()
    }

    pub fn clear_url_cache(&self) {
        self.url_cache.clear();
    }
}

impl Drop for AudioPlayerPool {
    fn drop(&mut self) {
        for (_, slot) in self.slots.get_mut().drain() {
            match slot {
                Slot::Loading { cancel, .. } => cancel.cancel(),
                Slot::Playing { voice, monitor, .. } => {
                    monitor.cancel();
                    voice.stop();
                }
                Slot::Failed { .. } => {}
            }
        }
    }
}

/// Clears a leader's `Loading` slot if its future is dropped mid-load.
struct LoadGuard<'a> {
    pool: &'a AudioPlayerPool,
    record_id: &'a str,
    op: u64,
    armed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.pool.slots.lock();
        if slots
            .get(self.record_id)
            .is_some_and(|s| s.is_loading_op(self.op))
        {
            if let Some(Slot::Loading { cancel, .. }) = slots.remove(self.record_id) {
                cancel.cancel();
            }
        }
    }
}
