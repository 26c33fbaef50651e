//! Replay of a recorded walk.
//!
//! Route files are plain text, one fix per line:
//!
//! ```text
//! # lat, lon[, accuracy_m[, pause_ms]]
//! 35.68120, 139.76710, 5
//! 35.68150, 139.76710, 5, 3000
//! ```
//!
//! Blank lines and `#` comments are ignored. `pause_ms` is how long to wait
//! after publishing that fix; it defaults to the replay interval.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::WatchLocationSource;
use crate::geo::Location;

/// Errors raised while loading a route.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to read route {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("route has no fixes")]
    Empty,
}

/// One fix of a recorded walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutePoint {
    pub location: Location,
    /// Overrides the replay interval after this fix.
    pub pause: Option<Duration>,
}

/// Parse route text into fixes.
pub fn parse_route(text: &str) -> Result<Vec<RoutePoint>, RouteError> {
    let mut points = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        let fields: Vec<&str> = content.split(',').map(str::trim).collect();
        if !(2..=4).contains(&fields.len()) {
            return Err(RouteError::Parse {
                line,
                reason: format!("expected 2-4 fields, found {}", fields.len()),
            });
        }

        let number = |i: usize, name: &str| -> Result<f64, RouteError> {
            fields[i].parse::<f64>().map_err(|_| RouteError::Parse {
                line,
                reason: format!("invalid {}: {:?}", name, fields[i]),
            })
        };

        let latitude = number(0, "latitude")?;
        let longitude = number(1, "longitude")?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(RouteError::Parse {
                line,
                reason: format!("coordinates out of range: {}, {}", latitude, longitude),
            });
        }

        let accuracy = if fields.len() > 2 {
            number(2, "accuracy")?
        } else {
            0.0
        };
        let pause = if fields.len() > 3 {
            let ms = fields[3].parse::<u64>().map_err(|_| RouteError::Parse {
                line,
                reason: format!("invalid pause: {:?}", fields[3]),
            })?;
            Some(Duration::from_millis(ms))
        } else {
            None
        };

        points.push(RoutePoint {
            location: Location::new(latitude, longitude).with_accuracy(accuracy),
            pause,
        });
    }

    if points.is_empty() {
        return Err(RouteError::Empty);
    }
    Ok(points)
}

/// Publishes a recorded walk into a [`WatchLocationSource`] at a fixed pace.
#[derive(Debug, Clone)]
pub struct RouteReplay {
    points: Vec<RoutePoint>,
    interval: Duration,
}

impl RouteReplay {
    /// Create a replay from parsed fixes.
    pub fn new(points: Vec<RoutePoint>, interval: Duration) -> Self {
        Self { points, interval }
    }

    /// Load and parse a route file.
    pub fn from_file(path: &Path, interval: Duration) -> Result<Self, RouteError> {
        let text = std::fs::read_to_string(path).map_err(|source| RouteError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(parse_route(&text)?, interval))
    }

    /// Number of fixes in the route.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the route is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Publish every fix in order, waiting between them.
    ///
    /// Returns the number of fixes published before completion or cancellation.
    pub async fn run(&self, source: &WatchLocationSource, cancel: CancellationToken) -> usize {
        let mut published = 0;

        for point in &self.points {
            if cancel.is_cancelled() {
                break;
            }
            source.publish(point.location);
            published += 1;

            let pause = point.pause.unwrap_or(self.interval);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::debug!(published, total = self.points.len(), "Route replay finished");
        published
    }
}
