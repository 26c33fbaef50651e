//! Events published to UI and diagnostic observers.
//!
//! The tracking session and the player pool publish on a shared
//! `tokio::sync::broadcast` channel. Observers that fall behind lose the
//! oldest events (`RecvError::Lagged`) but never block playback.

use std::fmt;

use tokio::sync::broadcast;

use crate::model::RecordId;
use crate::playback::PlaybackState;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Notifications meant for the user (toast-style, shown once).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserNotice {
    /// No location fix is available yet.
    NoLocation,
    /// The work has no marker data.
    NoLocationData,
    /// The work has markers but none with playable audio.
    NoPlayableWork,
    /// Fetching marker data failed.
    DataFetchFailed,
    /// Audio permission was refused; tracking continues degraded.
    PermissionDenied,
    TrackingStarted,
    TrackingStopped,
}

impl UserNotice {
    /// Message suitable for display.
    pub fn message(&self) -> &'static str {
        match self {
            UserNotice::NoLocation => "Waiting for location...",
            UserNotice::NoLocationData => "This work has no location data",
            UserNotice::NoPlayableWork => "This work has no playable audio points",
            UserNotice::DataFetchFailed => "Failed to fetch data",
            UserNotice::PermissionDenied => "Audio permission denied",
            UserNotice::TrackingStarted => "Tracking started, walk towards an audio point",
            UserNotice::TrackingStopped => "Tracking stopped",
        }
    }
}

impl fmt::Display for UserNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// An observable change in the tracking system.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    /// A record's geofence membership flipped.
    RangeChanged { record_id: RecordId, in_range: bool },
    /// A record's playback handle changed state.
    PlaybackStateChanged {
        record_id: RecordId,
        state: PlaybackState,
    },
    /// Tracking was started or stopped; `playing` is the active voice count.
    TrackingChanged { tracking: bool, playing: usize },
    /// Something the user should be told about.
    Notice(UserNotice),
}

/// Sending half shared by the session and the pool.
pub type EventSender = broadcast::Sender<TrackingEvent>;

/// Create an event channel with the default capacity.
pub fn event_channel() -> EventSender {
    let (tx, _rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
    tx
}

/// Publish an event, ignoring the no-subscriber case.
pub(crate) fn publish(tx: &EventSender, event: TrackingEvent) {
    tracing::trace!(?event, "Publishing event");
    let _ = tx.send(event);
}

/// Label shown on the tracking toggle, reflecting playback count.
pub fn tracking_button_label(tracking: bool, playing: usize) -> String {
    if playing > 0 {
        format!("stop tracking ({} playing)", playing)
    } else if tracking {
        "stop tracking".to_string()
    } else {
        "download audio and start tracking".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_label() {
        assert_eq!(
            tracking_button_label(false, 0),
            "download audio and start tracking"
        );
        assert_eq!(tracking_button_label(true, 0), "stop tracking");
        assert_eq!(tracking_button_label(true, 2), "stop tracking (2 playing)");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let tx = event_channel();
        publish(&tx, TrackingEvent::Notice(UserNotice::NoLocation));
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let tx = event_channel();
        let mut rx = tx.subscribe();
        publish(
            &tx,
            TrackingEvent::RangeChanged {
                record_id: "r1".into(),
                in_range: true,
            },
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            TrackingEvent::RangeChanged {
                record_id: "r1".into(),
                in_range: true
            }
        );
    }
}
