//! REST client for the soundwalk API.
//!
//! # Endpoints
//!
//! - `GET api/v1/get/locationMarkers?user_id=` - markers and work metadata
//! - `GET api/v1/get/recordsList?user_id=&latitude=&longitude=` - records
//!   of one marker
//! - `GET api/v1/get/worklist?latitude=&longitude=&radius=` - works near a
//!   point
//!
//! Every response is wrapped in `{ "code": 200, "data": ... }`; any other
//! code is an [`ProviderError::Api`] error.

use futures::future::{join_all, BoxFuture};
use reqwest::Url;
use serde::de::DeserializeOwned;

use super::wire::{Envelope, MarkersPayload, WireMarker, WireRecord, WireWork};
use super::{AsyncHttpClient, FetchedWork, ProviderError, WorkProvider};
use crate::geo::{haversine_distance, Location};
use crate::model::{MarkerPoint, WorkDataset, WorkInfo};

/// Default API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://nyw6vsud2p.ap-northeast-1.awsapprunner.com/";

const MARKERS_PATH: &str = "api/v1/get/locationMarkers";
const RECORDS_PATH: &str = "api/v1/get/recordsList";
const WORKLIST_PATH: &str = "api/v1/get/worklist";
pub(crate) const DOWNLOAD_PATH: &str = "api/v1/edit/downloadCreatedAudio";

/// Parse a base URL, making sure relative joins keep its path.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url, ProviderError> {
    let mut normalized = base_url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|e| ProviderError::InvalidUrl(format!("{}: {}", base_url, e)))
}

/// A published work near the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyWork {
    pub title: String,
    /// Publisher user id; doubles as the work's session id.
    pub user_id: String,
    pub author: String,
    pub playable_markers: u32,
    pub first_point: Option<Location>,
    /// Distance from the query point to `first_point`, in meters.
    pub distance_m: Option<f64>,
}

/// Work provider backed by the soundwalk REST API.
pub struct HttpWorkProvider<C: AsyncHttpClient> {
    http_client: C,
    base: Url,
}

impl<C: AsyncHttpClient> HttpWorkProvider<C> {
    /// Creates a provider for the API at `base_url`.
    pub fn new(http_client: C, base_url: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client,
            base: parse_base_url(base_url)?,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ProviderError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| ProviderError::InvalidUrl(format!("{}: {}", path, e)))?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }

    async fn get_data<T: DeserializeOwned>(&self, url: &Url) -> Result<Option<T>, ProviderError> {
        let body = self.http_client.get(url.as_str()).await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", url.path(), e)))?;
        if envelope.code != 200 {
            return Err(ProviderError::Api {
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }

    /// Fetch a work's markers with their playable records.
    ///
    /// Records are requested for every visible marker in parallel; a marker
    /// whose request fails is logged and left without records.
    pub async fn fetch_work(&self, session_id: &str) -> Result<FetchedWork, ProviderError> {
        let url = self.endpoint(MARKERS_PATH, &[("user_id", session_id.to_string())])?;
        let payload: Option<MarkersPayload> = self.get_data(&url).await?;

        let (wire_markers, info) = match payload {
            Some(p) => (
                p.markers.unwrap_or_default(),
                WorkInfo {
                    title: p.workname,
                    description: p.brief_intro,
                },
            ),
            None => (Vec::new(), WorkInfo::default()),
        };
        let raw_marker_count = wire_markers.len();

        let markers: Vec<MarkerPoint> = wire_markers
            .into_iter()
            .filter_map(WireMarker::into_marker)
            .filter(|m| m.visible)
            .collect();

        let fetches = markers
            .into_iter()
            .map(|marker| self.attach_records(session_id, marker));
        let markers = join_all(fetches).await;

        let mut dataset = WorkDataset::new(session_id, info, markers);
        dataset.retain_playable();

        tracing::info!(
            session_id,
            raw_markers = raw_marker_count,
            markers = dataset.markers.len(),
            records = dataset.record_count(),
            "Fetched work"
        );
        Ok(FetchedWork {
            dataset,
            raw_marker_count,
        })
    }

    async fn attach_records(&self, session_id: &str, mut marker: MarkerPoint) -> MarkerPoint {
        match self.fetch_records(session_id, &marker).await {
            Ok(records) => marker.records = records,
            Err(e) => {
                tracing::warn!(
                    latitude = marker.latitude,
                    longitude = marker.longitude,
                    error = %e,
                    "Failed to fetch records for marker"
                );
            }
        }
        marker
    }

    async fn fetch_records(
        &self,
        session_id: &str,
        marker: &MarkerPoint,
    ) -> Result<Vec<crate::model::AudioRecord>, ProviderError> {
        let url = self.endpoint(
            RECORDS_PATH,
            &[
                ("user_id", session_id.to_string()),
                ("latitude", marker.latitude.to_string()),
                ("longitude", marker.longitude.to_string()),
            ],
        )?;
        let records: Option<Vec<WireRecord>> = self.get_data(&url).await?;

        Ok(records
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.is_play)
            .filter_map(WireRecord::into_record)
            .collect())
    }

    /// List works around a point, nearest first.
    pub async fn list_works(
        &self,
        location: &Location,
        radius_km: f64,
    ) -> Result<Vec<NearbyWork>, ProviderError> {
        let url = self.endpoint(
            WORKLIST_PATH,
            &[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("radius", radius_km.to_string()),
            ],
        )?;
        let works: Option<Vec<WireWork>> = self.get_data(&url).await?;

        let mut works: Vec<NearbyWork> = works
            .unwrap_or_default()
            .into_iter()
            .filter_map(|w| {
                let user_id = w.user_id?;
                let first_point = w
                    .firstpoint_location
                    .and_then(|p| Some(Location::new(p.lat?, p.lng?)));
                let distance_m = first_point.map(|p| {
                    haversine_distance(
                        location.latitude,
                        location.longitude,
                        p.latitude,
                        p.longitude,
                    )
                });
                Some(NearbyWork {
                    title: w.work_name.unwrap_or_default(),
                    author: w.user_name.unwrap_or_else(|| user_id.clone()),
                    user_id,
                    playable_markers: w.playable_marker_count.unwrap_or(0.0).max(0.0) as u32,
                    first_point,
                    distance_m,
                })
            })
            .collect();

        works.sort_by(|a, b| {
            a.distance_m
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.distance_m.unwrap_or(f64::INFINITY))
        });
        tracing::debug!(count = works.len(), radius_km, "Listed nearby works");
        Ok(works)
    }
}

impl<C: AsyncHttpClient> WorkProvider for HttpWorkProvider<C> {
    fn fetch_work<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<FetchedWork, ProviderError>> {
        Box::pin(HttpWorkProvider::fetch_work(self, session_id))
    }
}
