//! JSON shapes returned by the soundwalk API.
//!
//! The API is loose about types: coordinates arrive as numbers or numeric
//! strings, flags as booleans or 0/1, ids as strings or integers. The
//! deserializers here accept all of these.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::model::{AudioRecord, MarkerPoint};

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    pub data: Option<T>,
}

/// Payload of `get/locationMarkers`.
#[derive(Debug, Deserialize)]
pub(crate) struct MarkersPayload {
    #[serde(default)]
    pub markers: Option<Vec<WireMarker>>,
    #[serde(default)]
    pub workname: Option<String>,
    #[serde(default)]
    pub brief_intro: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireMarker {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(rename = "isShow", default, deserialize_with = "truthy")]
    pub is_show: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub no: Option<String>,
    #[serde(default)]
    pub marker_name: Option<String>,
}

impl WireMarker {
    /// Convert to a marker without records; `None` if coordinates are missing.
    pub fn into_marker(self) -> Option<MarkerPoint> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        let mut marker = MarkerPoint::new(latitude, longitude);
        marker.visible = self.is_show;
        marker.marker_no = self.no.filter(|s| !s.is_empty());
        marker.display_name = self.marker_name.filter(|s| !s.is_empty());
        Some(marker)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PlayRange {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub inner_radius: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub outer_radius: Option<f64>,
}

/// One entry of `get/recordsList`.
#[derive(Debug, Deserialize)]
pub(crate) struct WireRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub record_id: Option<String>,
    #[serde(rename = "isPlay", default, deserialize_with = "truthy")]
    pub is_play: bool,
    #[serde(default)]
    pub play_range: Option<PlayRange>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub inner_radius: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub outer_radius: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub start_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub end_time: Option<f64>,
    #[serde(rename = "isLoop", default, deserialize_with = "truthy")]
    pub is_loop: bool,
}

impl WireRecord {
    /// Convert to a record; `None` if the id or radii are missing.
    ///
    /// Radii come from `play_range`, falling back to top-level fields.
    pub fn into_record(self) -> Option<AudioRecord> {
        let range = self.play_range.unwrap_or_default();
        let inner = range.inner_radius.or(self.inner_radius).unwrap_or(0.0);
        let outer = range.outer_radius.or(self.outer_radius)?;
        let mut record = AudioRecord::new(self.record_id?, inner, outer)
            .with_trim(self.start_time, self.end_time)
            .with_loop(self.is_loop);
        record.playable = self.is_play;
        Some(record)
    }
}

/// One entry of `get/worklist`.
#[derive(Debug, Deserialize)]
pub(crate) struct WireWork {
    #[serde(default)]
    pub work_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(default, alias = "username")]
    pub user_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub playable_marker_count: Option<f64>,
    #[serde(default)]
    pub firstpoint_location: Option<WirePoint>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WirePoint {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lng: Option<f64>,
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected a number, got {:?}", s))),
        Some(other) => Err(de::Error::custom(format!(
            "expected a number, got {}",
            other
        ))),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    })
}
