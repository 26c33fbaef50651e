//! Location acquisition.
//!
//! The tracking session does not own any OS-level location watch. It depends
//! on a [`LocationSource`], which supplies the latest fix on demand and lets
//! subscribers await new fixes.
//!
//! # Implementors
//!
//! - [`WatchLocationSource`] - push-fed source; platform glue calls
//!   [`WatchLocationSource::publish`] for every fix it receives
//! - [`RouteReplay`] - drives a `WatchLocationSource` from a recorded walk

mod replay;

pub use replay::{parse_route, RouteError, RoutePoint, RouteReplay};

use tokio::sync::watch;

use crate::geo::Location;

/// Supplies location fixes to the tracking session.
pub trait LocationSource: Send + Sync {
    /// The most recent fix, if any has arrived yet.
    fn current(&self) -> Option<Location>;

    /// Subscribe to fixes. The receiver only ever holds the newest one.
    fn subscribe(&self) -> watch::Receiver<Option<Location>>;
}

/// Push-fed location source backed by a `tokio::sync::watch` channel.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct WatchLocationSource {
    tx: watch::Sender<Option<Location>>,
}

impl Default for WatchLocationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchLocationSource {
    /// Create a source with no fix yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish a new fix to all subscribers.
    pub fn publish(&self, location: Location) {
        tracing::debug!(
            latitude = location.latitude,
            longitude = location.longitude,
            accuracy = location.accuracy,
            "Location updated"
        );
        self.tx.send_replace(Some(location));
    }

    /// Forget the current fix (e.g. the OS watch was lost).
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

impl LocationSource for WatchLocationSource {
    fn current(&self) -> Option<Location> {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Location>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_without_fix() {
        let source = WatchLocationSource::new();
        assert!(source.current().is_none());
    }

    #[test]
    fn test_publish_updates_current() {
        let source = WatchLocationSource::new();
        source.publish(Location::new(1.0, 2.0));
        assert_eq!(source.current(), Some(Location::new(1.0, 2.0)));

        source.clear();
        assert!(source.current().is_none());
    }

    #[tokio::test]
    async fn test_subscriber_sees_latest_fix() {
        let source = WatchLocationSource::new();
        let mut rx = source.subscribe();

        source.publish(Location::new(1.0, 1.0));
        source.publish(Location::new(2.0, 2.0));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(Location::new(2.0, 2.0)));
    }

    #[test]
    fn test_trait_object_usage() {
        let source: std::sync::Arc<dyn LocationSource> =
            std::sync::Arc::new(WatchLocationSource::new());
        assert!(source.current().is_none());
    }
}
