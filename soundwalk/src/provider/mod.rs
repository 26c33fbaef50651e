//! Work data and audio payload providers.
//!
//! The tracking core only sees three narrow seams:
//!
//! - [`WorkProvider`] - fetches a work's markers and records
//! - [`DownloadUrlFactory`] - maps a record id to its payload URL
//! - [`PayloadFetcher`] - downloads a payload for an audio backend
//!
//! The HTTP implementations talk to the soundwalk REST API through an
//! [`AsyncHttpClient`], so tests can swap in a mock client.
//!
//! ```ignore
//! use soundwalk::provider::{HttpWorkProvider, ReqwestClient, DEFAULT_API_BASE_URL};
//!
//! let client = ReqwestClient::new()?;
//! let provider = HttpWorkProvider::new(client, DEFAULT_API_BASE_URL)?;
//! let fetched = provider.fetch_work("user-42").await?;
//! ```

mod api;
mod http;
mod types;
mod wire;

pub use api::{HttpWorkProvider, NearbyWork, DEFAULT_API_BASE_URL};
pub use http::{AsyncHttpClient, ReqwestClient, DEFAULT_HTTP_TIMEOUT};
pub use types::ProviderError;

#[cfg(test)]
pub use http::tests::MockHttpClient;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::Url;

use crate::error::PlaybackError;
use crate::model::WorkDataset;

/// A fetched work, already filtered to visible markers with playable records.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedWork {
    pub dataset: WorkDataset,
    /// Markers the API returned before filtering.
    pub raw_marker_count: usize,
}

/// Source of work datasets.
pub trait WorkProvider: Send + Sync {
    fn fetch_work<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<FetchedWork, ProviderError>>;
}

/// Derives the payload URL of a record.
pub trait DownloadUrlFactory: Send + Sync {
    fn download_url(&self, session_id: &str, record_id: &str) -> String;
}

/// Download URLs served by the soundwalk API.
#[derive(Debug, Clone)]
pub struct ApiDownloadUrls {
    endpoint: Url,
}

impl ApiDownloadUrls {
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        let endpoint = api::parse_base_url(base_url)?
            .join(api::DOWNLOAD_PATH)
            .map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;
        Ok(Self { endpoint })
    }
}

impl DownloadUrlFactory for ApiDownloadUrls {
    fn download_url(&self, session_id: &str, record_id: &str) -> String {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("user_id", session_id)
            .append_pair("record_id", record_id);
        url.into()
    }
}

/// Downloads audio payloads.
pub trait PayloadFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, PlaybackError>>;
}

/// Payload fetcher over an [`AsyncHttpClient`].
///
/// 401 and 403 map to [`PlaybackError::Permission`]; every other failure is
/// a [`PlaybackError::Network`] error.
pub struct HttpPayloadFetcher<C: AsyncHttpClient> {
    http_client: C,
}

impl<C: AsyncHttpClient> HttpPayloadFetcher<C> {
    pub fn new(http_client: C) -> Self {
        Self { http_client }
    }
}

impl<C: AsyncHttpClient> PayloadFetcher for HttpPayloadFetcher<C> {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, PlaybackError>> {
        Box::pin(async move {
            match self.http_client.get(url).await {
                Ok(body) => {
                    tracing::debug!(url, bytes = body.len(), "Payload downloaded");
                    Ok(Bytes::from(body))
                }
                Err(e) if e.is_forbidden() => Err(PlaybackError::Permission(e.to_string())),
                Err(e) => Err(PlaybackError::Network(e.to_string())),
            }
        })
    }
}
