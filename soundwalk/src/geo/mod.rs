//! Geofence evaluation.
//!
//! Great-circle distance between WGS84 coordinates and the annular
//! membership test used to decide whether a record's geofence contains the
//! listener. Everything here is pure: no I/O, no state.

use serde::{Deserialize, Serialize};

use crate::model::{AudioRecord, MarkerPoint};

/// Mean Earth radius in meters used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A location fix from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
}

impl Location {
    /// Create a location with unknown (zero) accuracy.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
        }
    }

    /// Set the reported accuracy.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }
}

/// Great-circle distance in meters between two coordinates.
#[inline]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Distance in meters from a location to a marker.
#[inline]
pub fn distance_to(location: &Location, marker: &MarkerPoint) -> f64 {
    haversine_distance(
        location.latitude,
        location.longitude,
        marker.latitude,
        marker.longitude,
    )
}

/// Whether a distance falls inside a record's annulus (inclusive at both radii).
#[inline]
pub fn within_annulus(record: &AudioRecord, distance: f64) -> bool {
    record.inner_radius <= distance && distance <= record.outer_radius
}

/// Whether `location` lies inside the geofence of `record` around `marker`.
pub fn is_in_range(record: &AudioRecord, location: &Location, marker: &MarkerPoint) -> bool {
    within_annulus(record, distance_to(location, marker))
}

/// A marker found within a search radius.
#[derive(Debug, Clone, Copy)]
pub struct Nearby<'a> {
    pub marker: &'a MarkerPoint,
    /// Index of the marker in the input slice.
    pub index: usize,
    /// Distance from the query location in meters.
    pub distance: f64,
}

/// Markers within `range_m` of `location`, nearest first.
pub fn find_nearby<'a>(
    location: &Location,
    markers: &'a [MarkerPoint],
    range_m: f64,
) -> Vec<Nearby<'a>> {
    let mut nearby: Vec<Nearby<'a>> = markers
        .iter()
        .enumerate()
        .map(|(index, marker)| Nearby {
            marker,
            index,
            distance: distance_to(location, marker),
        })
        .filter(|n| n.distance <= range_m)
        .collect();

    nearby.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    nearby
}

/// Human-readable distance: whole meters below 1km, one decimal km above.
pub fn format_distance(meters: f64) -> String {
    if meters >= 1000.0 {
        format!("{:.1}km", meters / 1000.0)
    } else {
        format!("{}m", meters.round() as i64)
    }
}

/// Offset a coordinate by a distance north and east, in meters.
///
/// Accurate to well under a meter at soundwalk scales; used to place test and
/// simulated fixes at known distances from a marker.
pub fn offset_meters(latitude: f64, longitude: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let d_lat = (north_m / EARTH_RADIUS_M).to_degrees();
    let d_lon = (east_m / (EARTH_RADIUS_M * latitude.to_radians().cos())).to_degrees();
    (latitude + d_lat, longitude + d_lon)
}
