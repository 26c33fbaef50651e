//! Work, marker and record data model.
//!
//! A *work* is one soundscape published by a user. It is made of
//! [`MarkerPoint`]s on the map, each owning zero or more [`AudioRecord`]s whose
//! geofences are annuli centred on the marker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier of an audio record.
pub type RecordId = String;

/// Largest accepted trim offset, in seconds.
pub const MAX_TRIM_SECS: f64 = 86_400.0;

/// Errors raised when validating ingested data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// Radii are negative, non-finite, or inverted.
    #[error("record {record_id}: invalid radii inner={inner} outer={outer}")]
    InvalidRadius {
        record_id: RecordId,
        inner: f64,
        outer: f64,
    },

    /// Trim window is empty or ends before it starts.
    #[error("record {record_id}: end_time {end} does not follow start_time {start}")]
    InvalidTrim {
        record_id: RecordId,
        start: f64,
        end: f64,
    },

    /// A trim offset is not finite or exceeds [`MAX_TRIM_SECS`].
    #[error("record {record_id}: trim offset {value} is out of range")]
    TrimOutOfRange { record_id: RecordId, value: f64 },

    /// Marker coordinates are outside WGS84 bounds.
    #[error("marker at ({latitude}, {longitude}) is outside valid coordinates")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

/// A single playable audio asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRecord {
    pub record_id: RecordId,
    /// Inner geofence radius in meters.
    pub inner_radius: f64,
    /// Outer geofence radius in meters.
    pub outer_radius: f64,
    /// Playback start offset in seconds.
    pub start_time: Option<f64>,
    /// Playback end offset in seconds.
    pub end_time: Option<f64>,
    /// Whether playback wraps back to `start_time` at `end_time`.
    pub looped: bool,
    /// Publisher-controlled playability flag.
    #[serde(default = "default_true")]
    pub playable: bool,
}

fn default_true() -> bool {
    true
}

impl AudioRecord {
    /// Create a playable record with the given radii and no trim.
    pub fn new(record_id: impl Into<RecordId>, inner_radius: f64, outer_radius: f64) -> Self {
        Self {
            record_id: record_id.into(),
            inner_radius,
            outer_radius,
            start_time: None,
            end_time: None,
            looped: false,
            playable: true,
        }
    }

    /// Set the trim window in seconds.
    pub fn with_trim(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Set the loop flag.
    pub fn with_loop(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    /// Offset to seek to once the payload is loaded.
    pub fn start_offset(&self) -> Duration {
        self.start_time
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Position at which playback wraps or stops, if trimmed.
    pub fn end_offset(&self) -> Option<Duration> {
        self.end_time
            .filter(|e| *e > 0.0)
            .and_then(|e| Duration::try_from_secs_f64(e).ok())
    }

    /// Check radii and trim window.
    pub fn validate(&self) -> Result<(), ModelError> {
        let radii_ok = self.inner_radius.is_finite()
            && self.outer_radius.is_finite()
            && self.inner_radius >= 0.0
            && self.outer_radius >= self.inner_radius;
        if !radii_ok {
            return Err(ModelError::InvalidRadius {
                record_id: self.record_id.clone(),
                inner: self.inner_radius,
                outer: self.outer_radius,
            });
        }

        for value in [self.start_time, self.end_time].into_iter().flatten() {
            if !value.is_finite() || value > MAX_TRIM_SECS {
                return Err(ModelError::TrimOutOfRange {
                    record_id: self.record_id.clone(),
                    value,
                });
            }
        }

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end > 0.0 && end <= start {
                return Err(ModelError::InvalidTrim {
                    record_id: self.record_id.clone(),
                    start,
                    end,
                });
            }
        }

        Ok(())
    }
}

/// A geographic point of interest owning audio records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Publisher-assigned marker number, shown as the map label.
    pub marker_no: Option<String>,
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub records: Vec<AudioRecord>,
}

impl MarkerPoint {
    /// Create a visible marker with no records.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            marker_no: None,
            display_name: None,
            visible: true,
            records: Vec::new(),
        }
    }

    /// Attach a record to this marker.
    pub fn with_record(mut self, record: AudioRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Set the marker number.
    pub fn with_marker_no(mut self, no: impl Into<String>) -> Self {
        self.marker_no = Some(no.into());
        self
    }

    /// Key identifying the marker by its coordinates.
    pub fn coord_key(&self) -> String {
        format!("{}_{}", self.latitude, self.longitude)
    }

    /// Label for display: marker number, then name, then the 1-based index.
    pub fn label(&self, index: usize) -> String {
        self.marker_no
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.display_name.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| (index + 1).to_string())
    }

    /// Whether this marker has at least one playable record.
    pub fn has_playable_records(&self) -> bool {
        self.records.iter().any(|r| r.playable)
    }

    /// Check coordinate bounds.
    pub fn validate(&self) -> Result<(), ModelError> {
        let ok = self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude);
        if ok {
            Ok(())
        } else {
            Err(ModelError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// Descriptive metadata of a work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkInfo {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Everything needed to walk one work, as fetched and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkDataset {
    /// Session (publisher user) id the dataset belongs to.
    pub session_id: String,
    pub info: WorkInfo,
    pub markers: Vec<MarkerPoint>,
    pub fetched_at: DateTime<Utc>,
}

impl WorkDataset {
    /// Create a dataset stamped with the current time.
    pub fn new(session_id: impl Into<String>, info: WorkInfo, markers: Vec<MarkerPoint>) -> Self {
        Self {
            session_id: session_id.into(),
            info,
            markers,
            fetched_at: Utc::now(),
        }
    }

    /// An empty dataset for a session, used before anything is loaded.
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self::new(session_id, WorkInfo::default(), Vec::new())
    }

    /// Look up a record and the marker owning it.
    pub fn find_record(&self, record_id: &str) -> Option<(&MarkerPoint, &AudioRecord)> {
        self.markers.iter().find_map(|marker| {
            marker
                .records
                .iter()
                .find(|r| r.record_id == record_id)
                .map(|r| (marker, r))
        })
    }

    /// Total number of records across all markers.
    pub fn record_count(&self) -> usize {
        self.markers.iter().map(|m| m.records.len()).sum()
    }

    /// Number of markers with at least one playable record.
    pub fn playable_marker_count(&self) -> usize {
        self.markers
            .iter()
            .filter(|m| m.has_playable_records())
            .count()
    }

    /// Keep only visible markers with playable, valid records.
    ///
    /// Invalid records and markers are dropped with a warning rather than
    /// failing the whole dataset.
    pub fn retain_playable(&mut self) {
        self.markers.retain(|marker| {
            if let Err(e) = marker.validate() {
                tracing::warn!(error = %e, "Dropping marker");
                return false;
            }
            marker.visible
        });

        for marker in &mut self.markers {
            marker.records.retain(|record| {
                if !record.playable {
                    return false;
                }
                match record.validate() {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping record");
                        false
                    }
                }
            });
        }

        self.markers.retain(|m| !m.records.is_empty());
    }
}
