//! Walk command - replay a recorded route through a tracking session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use soundwalk::catalog::DatasetOrigin;
use soundwalk::events::TrackingEvent;
use soundwalk::location::{RouteReplay, WatchLocationSource};
use soundwalk::model::{RecordId, WorkDataset};
use soundwalk::playback::{AudioBackend, SimulatedBackend};
use soundwalk::session::TrackingSession;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use super::common::PolicyArg;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the walk command.
pub struct WalkArgs {
    pub user_id: String,
    pub route: PathBuf,
    pub policy: Option<PolicyArg>,
    pub interval_ms: u64,
    pub dry_run: bool,
    pub api_url: Option<String>,
}

/// Run the walk command.
pub fn run(args: WalkArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.api_url.as_deref())?;
    runner.log_startup("walk");

    let mut session_config = runner.config().session_config();
    if let Some(policy) = args.policy {
        session_config.machine.policy = policy.into();
    }

    let replay = RouteReplay::from_file(&args.route, Duration::from_millis(args.interval_ms))?;
    let catalog = runner.catalog()?;
    let urls = Arc::new(runner.download_urls()?);
    let backend = create_backend(&runner, args.dry_run)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, stopping...");
        signal.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    runner.block_on(async move {
        let opened = catalog.open(&args.user_id).await?;

        println!("Soundwalk v{}", soundwalk::VERSION);
        println!("==============");
        println!();
        println!(
            "Work:     {}",
            opened.dataset.info.title.as_deref().unwrap_or(&args.user_id)
        );
        println!(
            "Markers:  {} ({} records, {})",
            opened.dataset.markers.len(),
            opened.dataset.record_count(),
            match opened.origin {
                DatasetOrigin::Cache => "cached",
                DatasetOrigin::Network => "downloaded",
            }
        );
        println!("Route:    {} ({} fixes)", args.route.display(), replay.len());
        println!("Policy:   {}", session_config.machine.policy);
        println!("Audio:    {}", backend.name());
        println!();
        println!("Press Ctrl+C to stop tracking and exit");
        println!();

        let source = Arc::new(WatchLocationSource::new());
        let session = TrackingSession::new(
            opened.dataset,
            backend,
            urls,
            source.clone(),
            session_config,
        );

        let printer_done = CancellationToken::new();
        let printer = tokio::spawn(print_events(
            session.subscribe(),
            record_labels(&session.dataset()),
            printer_done.clone(),
        ));

        if let Some(refresh) = opened.refresh {
            let session = session.clone();
            tokio::spawn(async move {
                if let Ok(Some(dataset)) = refresh.await {
                    session.set_dataset(dataset);
                }
            });
        }

        let tracker = {
            let session = session.clone();
            let cancel = shutdown.clone();
            tokio::spawn(async move { session.run(cancel).await })
        };

        session.start_tracking();
        let published = replay.run(&source, shutdown.clone()).await;
        let completed = !shutdown.is_cancelled();

        shutdown.cancel();
        log_task_failure("tracking", tracker.await);
        printer_done.cancel();
        log_task_failure("event printer", printer.await);

        println!();
        if completed {
            println!("Route finished: {} fixes replayed", published);
        } else {
            println!("Stopped after {} of {} fixes", published, replay.len());
        }
        Ok::<(), CliError>(())
    })
}

#[cfg(feature = "audio-output")]
fn create_backend(runner: &CliRunner, dry_run: bool) -> Result<Arc<dyn AudioBackend>, CliError> {
    if dry_run {
        return Ok(Arc::new(SimulatedBackend::offline()));
    }
    let backend = soundwalk::playback::RodioBackend::open_default(runner.payload_fetcher()?)
        .map_err(CliError::Audio)?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "audio-output"))]
fn create_backend(runner: &CliRunner, dry_run: bool) -> Result<Arc<dyn AudioBackend>, CliError> {
    if dry_run {
        return Ok(Arc::new(SimulatedBackend::offline()));
    }
    println!("Built without the audio-output feature; playback is simulated.");
    Ok(Arc::new(SimulatedBackend::with_fetcher(
        runner.payload_fetcher()?,
    )))
}

/// Marker label for every record, for readable event output.
fn record_labels(dataset: &WorkDataset) -> HashMap<RecordId, String> {
    dataset
        .markers
        .iter()
        .enumerate()
        .flat_map(|(index, marker)| {
            let label = marker.label(index);
            marker
                .records
                .iter()
                .map(move |record| (record.record_id.clone(), label.clone()))
        })
        .collect()
}

/// Log a background task that panicked or was aborted. Returns whether it failed.
fn log_task_failure(task: &str, result: Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            tracing::error!(task, error = %e, "Background task failed");
            true
        }
    }
}

async fn print_events(
    mut events: broadcast::Receiver<TrackingEvent>,
    labels: HashMap<RecordId, String>,
    done: CancellationToken,
) {
    let describe = |record_id: &str| match labels.get(record_id) {
        Some(label) => format!("point {} ({})", label, record_id),
        None => record_id.to_string(),
    };

    loop {
        let event = tokio::select! {
            received = events.recv() => received,
            _ = done.cancelled() => {
                while let Ok(event) = events.try_recv() {
                    print_event(&event, &describe);
                }
                break;
            }
        };

        match event {
            Ok(event) => print_event(&event, &describe),
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Event printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &TrackingEvent, describe: &impl Fn(&str) -> String) {
    match event {
        TrackingEvent::RangeChanged {
            record_id,
            in_range,
        } => {
            let verb = if *in_range { "entered" } else { "left" };
            println!("[range]    {} {}", verb, describe(record_id));
        }
        TrackingEvent::PlaybackStateChanged { record_id, state } => {
            println!("[audio]    {} {}", describe(record_id), state);
        }
        TrackingEvent::TrackingChanged { tracking, playing } => {
            println!(
                "[tracking] {}",
                soundwalk::events::tracking_button_label(*tracking, *playing)
            );
        }
        TrackingEvent::Notice(notice) => {
            println!("[notice]   {}", notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundwalk::model::{AudioRecord, MarkerPoint, WorkInfo};

    #[test]
    fn test_record_labels_use_marker_labels() {
        let dataset = WorkDataset::new(
            "u",
            WorkInfo::default(),
            vec![
                MarkerPoint::new(35.0, 139.0)
                    .with_marker_no("A")
                    .with_record(AudioRecord::new("r1", 0.0, 30.0))
                    .with_record(AudioRecord::new("r2", 0.0, 30.0)),
                MarkerPoint::new(35.001, 139.0).with_record(AudioRecord::new("r3", 0.0, 30.0)),
            ],
        );

        let labels = record_labels(&dataset);

        assert_eq!(labels["r1"], "A");
        assert_eq!(labels["r2"], "A");
        assert_eq!(labels["r3"], "2");
    }

    #[tokio::test]
    async fn test_panicked_task_is_reported() {
        let panicked = tokio::spawn(async {
            panic!("printer crashed");
        })
        .await;
        assert!(log_task_failure("event printer", panicked));

        let finished = tokio::spawn(async {}).await;
        assert!(!log_task_failure("event printer", finished));
    }
}
