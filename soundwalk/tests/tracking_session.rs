//! Integration tests for the tracking session.
//!
//! These tests walk a simulated listener around a small work and verify:
//! - geofence entry starts playback and exit stops it
//! - re-entry behaviour under both policies
//! - failure isolation, timeouts and single in-flight starts
//! - check-interval deferral and the `run` loop
//!
//! Run with: `cargo test --test tracking_session`

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use soundwalk::error::PlaybackError;
use soundwalk::events::{TrackingEvent, UserNotice};
use soundwalk::geo::{offset_meters, Location};
use soundwalk::location::{RoutePoint, RouteReplay, WatchLocationSource};
use soundwalk::model::{AudioRecord, MarkerPoint, WorkDataset, WorkInfo};
use soundwalk::playback::{
    AudioBackend, OpenRequest, PlaybackState, RecordPhase, ReentryPolicy, SimulatedVoice, Voice,
    DEFAULT_START_TIMEOUT,
};
use soundwalk::provider::DownloadUrlFactory;
use soundwalk::session::{SampleDecision, SessionConfig, TickHandle, TrackingSession};

// ============================================================================
// Helper Types
// ============================================================================

const ORIGIN: (f64, f64) = (35.0, 139.0);

struct Urls;

impl DownloadUrlFactory for Urls {
    fn download_url(&self, session_id: &str, record_id: &str) -> String {
        format!("test://{}/{}", session_id, record_id)
    }
}

/// Backend with per-record delays and failures.
#[derive(Default)]
struct ScriptedBackend {
    delay: Duration,
    failures: HashMap<String, PlaybackError>,
    opens: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn failing(mut self, record_id: &str, error: PlaybackError) -> Self {
        self.failures.insert(record_id.to_string(), error);
        self
    }

    fn opens(&self, record_id: &str) -> usize {
        self.opens.lock().get(record_id).copied().unwrap_or(0)
    }
}

impl AudioBackend for ScriptedBackend {
    fn open<'a>(
        &'a self,
        request: &'a OpenRequest,
    ) -> BoxFuture<'a, Result<Arc<dyn Voice>, PlaybackError>> {
        Box::pin(async move {
            *self
                .opens
                .lock()
                .entry(request.record_id.clone())
                .or_insert(0) += 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(e) = self.failures.get(&request.record_id) {
                return Err(e.clone());
            }
            Ok(Arc::new(SimulatedVoice::new(
                Duration::from_secs(600),
                request.loop_whole,
            )) as Arc<dyn Voice>)
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A fix `north_m` meters north of the origin marker.
fn at(north_m: f64) -> Location {
    let (lat, lon) = offset_meters(ORIGIN.0, ORIGIN.1, north_m, 0.0);
    Location::new(lat, lon)
}

/// Marker `north_m` north of the origin with one record (outer radius 50 m).
fn marker(north_m: f64, record_id: &str) -> MarkerPoint {
    let (lat, lon) = offset_meters(ORIGIN.0, ORIGIN.1, north_m, 0.0);
    MarkerPoint::new(lat, lon).with_record(AudioRecord::new(record_id, 0.0, 50.0))
}

fn dataset(markers: Vec<MarkerPoint>) -> WorkDataset {
    WorkDataset::new("walk", WorkInfo::default(), markers)
}

fn session_with(
    markers: Vec<MarkerPoint>,
    backend: Arc<ScriptedBackend>,
    policy: ReentryPolicy,
) -> (TrackingSession, Arc<WatchLocationSource>) {
    let source = Arc::new(WatchLocationSource::new());
    let mut config = SessionConfig::default();
    config.machine.policy = policy;
    let session = TrackingSession::new(
        dataset(markers),
        backend,
        Arc::new(Urls),
        source.clone(),
        config,
    );
    (session, source)
}

/// Run one check at `north_m` and wait for its starts to resolve.
async fn walk_to(session: &TrackingSession, north_m: f64) -> (Vec<String>, Vec<String>) {
    let tick = session.check_proximity(at(north_m));
    let result = (tick.starts().to_vec(), tick.stops().to_vec());
    tick.settled().await;
    result
}

fn drain(events: &mut broadcast::Receiver<TrackingEvent>) -> Vec<TrackingEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn notices(events: &[TrackingEvent]) -> Vec<UserNotice> {
    events
        .iter()
        .filter_map(|e| match e {
            TrackingEvent::Notice(n) => Some(*n),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Enter, leave and re-enter a geofence under the repeat policy.
#[tokio::test(start_paused = true)]
async fn test_walk_in_out_in_repeats() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend.clone(), ReentryPolicy::Repeat);
    session.start_tracking();

    let (starts, _) = walk_to(&session, 40.0).await;
    assert_eq!(starts, ["r"]);
    assert_eq!(session.pool().state("r"), PlaybackState::Playing);

    let (starts, stops) = walk_to(&session, 60.0).await;
    assert!(starts.is_empty());
    assert_eq!(stops, ["r"]);
    assert_eq!(session.pool().state("r"), PlaybackState::Idle);
    assert_eq!(session.phase("r"), RecordPhase::OutOfRange);

    let (starts, _) = walk_to(&session, 30.0).await;
    assert_eq!(starts, ["r"]);
    assert_eq!(session.playing_count(), 1);
    assert_eq!(backend.opens("r"), 2);
}

/// Under the once policy a record never plays twice in one tracking run.
#[tokio::test(start_paused = true)]
async fn test_walk_in_out_in_once() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend.clone(), ReentryPolicy::Once);
    session.start_tracking();

    walk_to(&session, 40.0).await;
    walk_to(&session, 60.0).await;
    let (starts, _) = walk_to(&session, 30.0).await;

    assert!(starts.is_empty());
    assert_eq!(session.playing_count(), 0);
    assert_eq!(backend.opens("r"), 1);
    assert_eq!(session.phase("r"), RecordPhase::InRangeUnplayed);

    // A new tracking run forgets what was played.
    session.stop_tracking();
    session.start_tracking();
    let (starts, _) = walk_to(&session, 30.0).await;
    assert_eq!(starts, ["r"]);
}

/// Staying inside a geofence does not restart the record.
#[tokio::test(start_paused = true)]
async fn test_dwelling_does_not_restart() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend.clone(), ReentryPolicy::Repeat);
    session.start_tracking();

    walk_to(&session, 40.0).await;
    for north in [35.0, 20.0, 45.0] {
        let (starts, stops) = walk_to(&session, north).await;
        assert!(starts.is_empty());
        assert!(stops.is_empty());
    }

    assert_eq!(backend.opens("r"), 1);
    assert_eq!(session.phase("r"), RecordPhase::InRangePlayed);
}

/// Overlapping geofences play simultaneously.
#[tokio::test(start_paused = true)]
async fn test_overlapping_markers_play_together() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, _source) = session_with(
        vec![marker(0.0, "a"), marker(10.0, "b")],
        backend,
        ReentryPolicy::Repeat,
    );
    session.start_tracking();

    let (mut starts, _) = walk_to(&session, 5.0).await;
    starts.sort();

    assert_eq!(starts, ["a", "b"]);
    assert_eq!(session.pool().playing_ids(), ["a", "b"]);
    assert_eq!(session.button_label(), "stop tracking (2 playing)");
}

/// One failing record does not affect its neighbours, and is retried.
#[tokio::test(start_paused = true)]
async fn test_failure_is_isolated_and_retried() {
    let backend = Arc::new(
        ScriptedBackend::default()
            .failing("bad", PlaybackError::Network("connection reset".into())),
    );
    let (session, _source) = session_with(
        vec![marker(0.0, "good"), marker(0.0, "bad")],
        backend.clone(),
        ReentryPolicy::Repeat,
    );
    session.start_tracking();

    walk_to(&session, 10.0).await;

    assert_eq!(session.pool().state("good"), PlaybackState::Playing);
    assert_eq!(session.pool().state("bad"), PlaybackState::Error);
    assert_eq!(session.playing_count(), 1);

    let (starts, _) = walk_to(&session, 12.0).await;
    assert_eq!(starts, ["bad"]);
    assert_eq!(backend.opens("bad"), 2);
    assert_eq!(backend.opens("good"), 1);
}

/// A payload that cannot be decoded is not retried while tracking.
#[tokio::test(start_paused = true)]
async fn test_decode_failure_is_not_retried() {
    let backend = Arc::new(
        ScriptedBackend::default().failing("r", PlaybackError::Decode("bad header".into())),
    );
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend.clone(), ReentryPolicy::Repeat);
    session.start_tracking();

    walk_to(&session, 10.0).await;
    walk_to(&session, 60.0).await;
    let (starts, _) = walk_to(&session, 10.0).await;

    assert!(starts.is_empty());
    assert_eq!(backend.opens("r"), 1);
}

/// A check during a slow load does not start a second load.
#[tokio::test(start_paused = true)]
async fn test_single_start_in_flight() {
    let backend = Arc::new(ScriptedBackend::with_delay(Duration::from_secs(5)));
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend.clone(), ReentryPolicy::Repeat);
    session.start_tracking();

    let first = session.check_proximity(at(40.0));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.pool().state("r"), PlaybackState::Loading);

    let second = session.check_proximity(at(41.0));
    assert!(second.starts().is_empty());

    first.settled().await;
    second.settled().await;

    assert_eq!(backend.opens("r"), 1);
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(session.pool().state("r"), PlaybackState::Playing);
}

/// Leaving a geofence while its audio is still loading cancels the load.
#[tokio::test(start_paused = true)]
async fn test_exit_during_load_never_plays() {
    let backend = Arc::new(ScriptedBackend::with_delay(Duration::from_secs(5)));
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend, ReentryPolicy::Repeat);
    session.start_tracking();

    let entering = session.check_proximity(at(40.0));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let leaving = session.check_proximity(at(60.0));
    assert_eq!(leaving.stops(), ["r"]);

    entering.settled().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(session.pool().state("r"), PlaybackState::Idle);
    assert_eq!(session.playing_count(), 0);
}

/// A load that never finishes times out into the error state.
#[tokio::test(start_paused = true)]
async fn test_start_timeout() {
    let backend = Arc::new(ScriptedBackend::with_delay(Duration::from_secs(60)));
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend, ReentryPolicy::Repeat);
    let mut events = session.subscribe();
    session.start_tracking();

    walk_to(&session, 10.0).await;

    assert_eq!(session.pool().state("r"), PlaybackState::Error);
    assert_eq!(
        session.pool().last_error("r"),
        Some(PlaybackError::Timeout(DEFAULT_START_TIMEOUT))
    );
    assert!(drain(&mut events).contains(&TrackingEvent::PlaybackStateChanged {
        record_id: "r".into(),
        state: PlaybackState::Error,
    }));
}

/// Permission failures surface one notice per tracking run.
#[tokio::test(start_paused = true)]
async fn test_permission_notice_shown_once() {
    let backend = Arc::new(
        ScriptedBackend::default()
            .failing("a", PlaybackError::Permission("403".into()))
            .failing("b", PlaybackError::Permission("403".into())),
    );
    let (session, _source) = session_with(
        vec![marker(0.0, "a"), marker(0.0, "b")],
        backend,
        ReentryPolicy::Repeat,
    );
    let mut events = session.subscribe();
    session.start_tracking();

    walk_to(&session, 10.0).await;
    walk_to(&session, 11.0).await;

    let denied = notices(&drain(&mut events))
        .into_iter()
        .filter(|n| *n == UserNotice::PermissionDenied)
        .count();
    assert_eq!(denied, 1);
    assert!(session.is_tracking());
}

/// Stopping twice is harmless and publishes once.
#[tokio::test(start_paused = true)]
async fn test_stop_tracking_is_idempotent() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend, ReentryPolicy::Repeat);
    let mut events = session.subscribe();
    session.start_tracking();
    walk_to(&session, 10.0).await;

    assert_eq!(session.stop_tracking(), 1);
    assert_eq!(session.stop_tracking(), 0);

    let stopped = notices(&drain(&mut events))
        .into_iter()
        .filter(|n| *n == UserNotice::TrackingStopped)
        .count();
    assert_eq!(stopped, 1);
    assert_eq!(session.pool().state("r"), PlaybackState::Idle);
}

/// A start that resolves after tracking stopped is released.
#[tokio::test(start_paused = true)]
async fn test_stop_tracking_during_load() {
    let backend = Arc::new(ScriptedBackend::with_delay(Duration::from_secs(3)));
    let (session, _source) =
        session_with(vec![marker(0.0, "r")], backend, ReentryPolicy::Repeat);
    session.start_tracking();

    let tick = session.check_proximity(at(10.0));
    tokio::time::sleep(Duration::from_secs(1)).await;
    session.stop_tracking();
    tick.settled().await;

    assert_eq!(session.playing_count(), 0);
    assert_eq!(session.pool().state("r"), PlaybackState::Idle);
}

/// Samples inside the check interval are deferred; the newest one wins.
#[tokio::test(start_paused = true)]
async fn test_samples_are_debounced() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, source) =
        session_with(vec![marker(0.0, "r")], backend, ReentryPolicy::Repeat);
    source.publish(at(200.0));

    let initial: TickHandle = session.start_tracking().expect("initial check");
    assert!(initial.starts().is_empty());

    let deadline = match session.on_location(at(100.0)) {
        SampleDecision::Deferred(deadline) => deadline,
        other => panic!("expected deferral, got {other:?}"),
    };
    assert!(matches!(
        session.on_location(at(40.0)),
        SampleDecision::Deferred(d) if d == deadline
    ));
    assert!(session.flush_deferred().is_none());

    tokio::time::sleep_until(deadline).await;
    let tick = session.flush_deferred().expect("deferred sample due");
    assert_eq!(tick.starts(), ["r"]);
    tick.settled().await;

    assert!(session.next_deadline().is_none());
    assert_eq!(session.playing_count(), 1);
}

/// The run loop consumes fixes, honours deferral and stops on cancel.
#[tokio::test(start_paused = true)]
async fn test_run_loop_follows_source() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, source) =
        session_with(vec![marker(0.0, "r")], backend, ReentryPolicy::Repeat);
    let mut events = session.subscribe();

    assert!(session.start_tracking().is_none());
    assert!(notices(&drain(&mut events)).contains(&UserNotice::NoLocation));

    let cancel = CancellationToken::new();
    let handle = {
        let session = session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { session.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    source.publish(at(40.0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.playing_count(), 1);

    source.publish(at(60.0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.playing_count(), 1, "exit should wait for the interval");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.playing_count(), 0);

    cancel.cancel();
    handle.await.unwrap();
    assert!(!session.is_tracking());
}

/// A replayed walk drives playback end to end.
#[tokio::test(start_paused = true)]
async fn test_replayed_route() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, source) =
        session_with(vec![marker(0.0, "r")], backend, ReentryPolicy::Repeat);
    let mut events = session.subscribe();
    session.start_tracking();

    let cancel = CancellationToken::new();
    let runner = {
        let session = session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { session.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let route = RouteReplay::new(
        [100.0, 40.0, 30.0, 70.0]
            .into_iter()
            .map(|north| RoutePoint {
                location: at(north),
                pause: None,
            })
            .collect(),
        Duration::from_secs(2),
    );
    let published = route.run(&source, cancel.clone()).await;
    assert_eq!(published, 4);

    cancel.cancel();
    runner.await.unwrap();

    let states: Vec<PlaybackState> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            TrackingEvent::PlaybackStateChanged { record_id, state } if record_id == "r" => {
                Some(state)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        [
            PlaybackState::Loading,
            PlaybackState::Playing,
            PlaybackState::Idle
        ]
    );
}
