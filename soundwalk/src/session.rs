//! Tracking session: location samples in, playback decisions out.
//!
//! A session is either idle or tracking. While tracking, every location
//! sample runs a proximity check through the [`PlaybackStateMachine`], at
//! most once per `check_interval`; a sample arriving inside the window is
//! deferred to the end of the window, and a newer one replaces it.
//!
//! Checks never wait for audio. Stops are applied immediately; starts are
//! spawned as tasks that report their outcome back to the state machine.
//! Each tracking run has a generation number, so a start that resolves after
//! `stop_tracking` is discarded and its voice released.
//!
//! ```ignore
//! let session = TrackingSession::new(dataset, backend, urls, source, SessionConfig::default());
//! let mut events = session.subscribe();
//! session.start_tracking();
//! session.run(shutdown).await;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PlaybackError;
use crate::events::{
    event_channel, publish, tracking_button_label, EventSender, TrackingEvent, UserNotice,
};
use crate::geo::Location;
use crate::location::LocationSource;
use crate::model::{AudioRecord, RecordId, WorkDataset};
use crate::playback::{
    AudioBackend, AudioPlayerPool, MachineConfig, PlaybackStateMachine, PoolConfig, RangeState,
    RecordPhase, StartOutcome,
};
use crate::provider::DownloadUrlFactory;

/// Default minimum spacing between proximity checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub check_interval: Duration,
    pub machine: MachineConfig,
    pub pool: PoolConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            machine: MachineConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// What happened to a location sample.
#[derive(Debug)]
pub enum SampleDecision {
    /// A proximity check ran.
    Checked(TickHandle),
    /// The sample is held until the given instant.
    Deferred(Instant),
    /// The session is idle; the sample was only remembered.
    Ignored,
}

/// Handle to the work spawned by one proximity check.
#[derive(Debug, Default)]
pub struct TickHandle {
    starts: Vec<RecordId>,
    stops: Vec<RecordId>,
    tasks: Vec<JoinHandle<()>>,
}

impl TickHandle {
    /// Records this check tried to start.
    pub fn starts(&self) -> &[RecordId] {
        &self.starts
    }

    /// Records this check stopped.
    pub fn stops(&self) -> &[RecordId] {
        &self.stops
    }

    /// Wait until every start spawned by this check has resolved.
    pub async fn settled(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Start task panicked");
            }
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    tracking: bool,
    generation: u64,
    last_check: Option<Instant>,
    deferred: Option<Location>,
    deadline: Option<Instant>,
    last_location: Option<Location>,
    permission_notified: bool,
}

struct Inner {
    pool: Arc<AudioPlayerPool>,
    machine: Mutex<PlaybackStateMachine>,
    dataset: RwLock<Arc<WorkDataset>>,
    source: Arc<dyn LocationSource>,
    events: EventSender,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

/// Drives proximity-triggered playback for one work.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct TrackingSession {
    inner: Arc<Inner>,
}

impl TrackingSession {
    pub fn new(
        dataset: WorkDataset,
        backend: Arc<dyn AudioBackend>,
        urls: Arc<dyn DownloadUrlFactory>,
        source: Arc<dyn LocationSource>,
        config: SessionConfig,
    ) -> Self {
        let events = event_channel();
        let pool = AudioPlayerPool::new(
            backend,
            urls,
            dataset.session_id.clone(),
            config.pool,
            events.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                pool: Arc::new(pool),
                machine: Mutex::new(PlaybackStateMachine::new(config.machine)),
                dataset: RwLock::new(Arc::new(dataset)),
                source,
                events,
                config,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &Arc<AudioPlayerPool> {
        &self.inner.pool
    }

    pub fn dataset(&self) -> Arc<WorkDataset> {
        Arc::clone(&self.inner.dataset.read())
    }

    /// Swap in a refreshed dataset. Records that disappeared are stopped on
    /// the next check.
    pub fn set_dataset(&self, dataset: WorkDataset) {
        let current = self.dataset();
        if current.session_id != dataset.session_id {
            tracing::warn!(
                current = %current.session_id,
                new = %dataset.session_id,
                "Ignoring dataset for another session"
            );
            return;
        }
        tracing::info!(
            markers = dataset.markers.len(),
            records = dataset.record_count(),
            "Dataset updated"
        );
        *self.inner.dataset.write() = Arc::new(dataset);
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.state.lock().tracking
    }

    pub fn playing_count(&self) -> usize {
        self.inner.pool.playing_count()
    }

    /// Label for the tracking toggle.
    pub fn button_label(&self) -> String {
        tracking_button_label(self.is_tracking(), self.playing_count())
    }

    pub fn last_location(&self) -> Option<Location> {
        self.inner.state.lock().last_location
    }

    pub fn phase(&self, record_id: &str) -> RecordPhase {
        self.inner.machine.lock().phase(record_id)
    }

    pub fn range_state(&self, record_id: &str) -> Option<RangeState> {
        self.inner.machine.lock().range_state(record_id)
    }

    /// Records currently inside their geofence.
    pub fn in_range_ids(&self) -> Vec<RecordId> {
        self.inner.machine.lock().in_range_ids()
    }

    /// Begin tracking and run one immediate check with the last known fix.
    ///
    /// Returns `None` if already tracking or if no fix is available yet (in
    /// which case a `NoLocation` notice is published).
    pub fn start_tracking(&self) -> Option<TickHandle> {
        let remembered = {
            let mut state = self.inner.state.lock();
            if state.tracking {
                return None;
            }
            state.tracking = true;
            state.last_check = None;
            state.deferred = None;
            state.deadline = None;
            state.permission_notified = false;
            state.last_location
        };

        tracing::info!(
            session_id = %self.dataset().session_id,
            policy = %self.inner.config.machine.policy,
            "Tracking started"
        );
        publish(
            &self.inner.events,
            TrackingEvent::TrackingChanged {
                tracking: true,
                playing: self.playing_count(),
            },
        );
        publish(
            &self.inner.events,
            TrackingEvent::Notice(UserNotice::TrackingStarted),
        );

        match self.inner.source.current().or(remembered) {
            Some(location) => {
                {
                    let mut state = self.inner.state.lock();
                    state.last_location = Some(location);
                    state.last_check = Some(Instant::now());
                }
                Some(self.check_proximity(location))
            }
            None => {
                tracing::info!("No location fix yet");
                publish(&self.inner.events, TrackingEvent::Notice(UserNotice::NoLocation));
                None
            }
        }
    }

    /// Stop all playback and forget every range state.
    ///
    /// Returns how many records were loading or playing.
    pub fn stop_tracking(&self) -> usize {
        {
            let mut state = self.inner.state.lock();
            if !state.tracking {
                return 0;
            }
            state.tracking = false;
            state.generation += 1;
            state.last_check = None;
            state.deferred = None;
            state.deadline = None;
        }

        let stopped = self.inner.pool.stop_all();
        self.inner.machine.lock().reset();

        tracing::info!(stopped, "Tracking stopped");
        publish(
            &self.inner.events,
            TrackingEvent::TrackingChanged {
                tracking: false,
                playing: 0,
            },
        );
        publish(
            &self.inner.events,
            TrackingEvent::Notice(UserNotice::TrackingStopped),
        );
        stopped
    }

    /// Feed a location sample, applying the check interval.
    pub fn on_location(&self, location: Location) -> SampleDecision {
        let now = Instant::now();
        {
            let mut state = self.inner.state.lock();
            state.last_location = Some(location);
            if !state.tracking {
                return SampleDecision::Ignored;
            }

            if let Some(last) = state.last_check {
                let deadline = last + self.inner.config.check_interval;
                if now < deadline {
                    state.deferred = Some(location);
                    state.deadline = Some(deadline);
                    tracing::trace!(?deadline, "Sample deferred");
                    return SampleDecision::Deferred(deadline);
                }
            }

            state.last_check = Some(now);
            state.deferred = None;
            state.deadline = None;
        }

        SampleDecision::Checked(self.check_proximity(location))
    }

    /// When a deferred sample is due, if one is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.state.lock().deadline
    }

    /// Run the deferred sample if its window has elapsed.
    pub fn flush_deferred(&self) -> Option<TickHandle> {
        let now = Instant::now();
        let location = {
            let mut state = self.inner.state.lock();
            match (state.deadline, state.deferred) {
                (Some(deadline), Some(location)) if state.tracking && now >= deadline => {
                    state.last_check = Some(now);
                    state.deferred = None;
                    state.deadline = None;
                    location
                }
                _ => return None,
            }
        };
        Some(self.check_proximity(location))
    }

    /// Run one proximity check now, bypassing the check interval.
    ///
    /// Does nothing while idle.
    pub fn check_proximity(&self, location: Location) -> TickHandle {
        let generation = {
            let state = self.inner.state.lock();
            if !state.tracking {
                return TickHandle::default();
            }
            state.generation
        };

        let dataset = self.dataset();
        let active: HashSet<RecordId> = self.inner.pool.active_ids();
        let plan = self
            .inner
            .machine
            .lock()
            .evaluate(&location, &dataset, &active, Instant::now());

        for (record_id, transition) in &plan.transitions {
            publish(
                &self.inner.events,
                TrackingEvent::RangeChanged {
                    record_id: record_id.clone(),
                    in_range: transition.in_range(),
                },
            );
        }

        for record_id in &plan.stops {
            if self.inner.pool.stop(record_id) {
                tracing::info!(record_id = %record_id, "Left geofence, playback stopped");
            }
        }

        let starts: Vec<RecordId> = plan.starts.iter().map(|r| r.record_id.clone()).collect();
        let tasks = plan
            .starts
            .into_iter()
            .map(|record| self.spawn_start(record, generation))
            .collect();

        TickHandle {
            starts,
            stops: plan.stops,
            tasks,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.inner.state.lock();
        state.tracking && state.generation == generation
    }

    fn spawn_start(&self, record: AudioRecord, generation: u64) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move { session.run_start(record, generation).await })
    }

    async fn run_start(&self, record: AudioRecord, generation: u64) {
        if !self.is_current(generation) {
            return;
        }

        let outcome = self.inner.pool.start(&record).await;
        let record_id = record.record_id.as_str();

        if !self.is_current(generation) {
            if matches!(outcome, Ok(StartOutcome::Started)) {
                self.inner.pool.stop(record_id);
            }
            tracing::debug!(record_id, "Start resolved after tracking stopped");
            return;
        }

        let left_range = self.inner.machine.lock().record_outcome(record_id, &outcome);
        if left_range {
            tracing::debug!(record_id, "Started after leaving geofence, stopping");
            self.inner.pool.stop(record_id);
        }

        match &outcome {
            Ok(StartOutcome::Started) => publish(
                &self.inner.events,
                TrackingEvent::TrackingChanged {
                    tracking: true,
                    playing: self.playing_count(),
                },
            ),
            Err(PlaybackError::Permission(_)) => self.notify_permission_once(),
            _ => {}
        }
    }

    fn notify_permission_once(&self) {
        let first = {
            let mut state = self.inner.state.lock();
            !std::mem::replace(&mut state.permission_notified, true)
        };
        if first {
            publish(
                &self.inner.events,
                TrackingEvent::Notice(UserNotice::PermissionDenied),
            );
        }
    }

    /// Consume fixes from the location source until `cancel` fires, then
    /// stop tracking.
    ///
    /// Tracking itself is toggled with [`start_tracking`](Self::start_tracking);
    /// fixes arriving while idle are only remembered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut fixes = self.inner.source.subscribe();
        let initial = *fixes.borrow_and_update();
        if let Some(location) = initial {
            self.on_location(location);
        }

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = fixes.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Location source closed");
                        cancel.cancelled().await;
                        break;
                    }
                    let fix = *fixes.borrow_and_update();
                    if let Some(location) = fix {
                        self.on_location(location);
                    }
                }
                _ = sleep_until(deadline) => {
                    self.flush_deferred();
                }
            }
        }

        self.stop_tracking();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
