//! Cache-first loading of work datasets.
//!
//! Opening a work returns the cached dataset immediately when one with at
//! least one marker exists, and refreshes it from the provider in the
//! background. Without a usable cache the dataset is fetched, validated and
//! stored before it is returned.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::events::UserNotice;
use crate::model::WorkDataset;
use crate::provider::{ProviderError, WorkProvider};
use crate::store::{DatasetStore, StoreError};

/// Errors raised while opening a work.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to fetch work: {0}")]
    Provider(#[from] ProviderError),

    #[error("dataset cache error: {0}")]
    Store(#[from] StoreError),

    /// The work has no markers at all.
    #[error("work has no location data")]
    NoLocationData,

    /// The work has markers but none with playable audio.
    #[error("work has no playable audio points")]
    NoPlayableWork,
}

impl CatalogError {
    /// Notice to show the user for this failure.
    pub fn notice(&self) -> UserNotice {
        match self {
            CatalogError::NoLocationData => UserNotice::NoLocationData,
            CatalogError::NoPlayableWork => UserNotice::NoPlayableWork,
            CatalogError::Provider(_) | CatalogError::Store(_) => UserNotice::DataFetchFailed,
        }
    }
}

/// Where an opened dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetOrigin {
    Cache,
    Network,
}

/// Result of [`Catalog::open`].
#[derive(Debug)]
pub struct OpenedWork {
    pub dataset: WorkDataset,
    pub origin: DatasetOrigin,
    /// Background refresh of a cached dataset; resolves to the fresh copy.
    pub refresh: Option<JoinHandle<Option<WorkDataset>>>,
}

/// Work datasets backed by a provider and a persisted cache.
#[derive(Clone)]
pub struct Catalog {
    provider: Arc<dyn WorkProvider>,
    store: Arc<dyn DatasetStore>,
}

impl Catalog {
    pub fn new(provider: Arc<dyn WorkProvider>, store: Arc<dyn DatasetStore>) -> Self {
        Self { provider, store }
    }

    /// Open a work, preferring the cache.
    pub async fn open(&self, session_id: &str) -> Result<OpenedWork, CatalogError> {
        match self.store.load(session_id).await {
            Ok(Some(dataset)) if !dataset.markers.is_empty() => {
                tracing::info!(
                    session_id,
                    markers = dataset.markers.len(),
                    fetched_at = %dataset.fetched_at,
                    "Using cached dataset"
                );
                return Ok(OpenedWork {
                    dataset,
                    origin: DatasetOrigin::Cache,
                    refresh: Some(self.spawn_refresh(session_id)),
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Ignoring unreadable dataset cache");
            }
        }

        let dataset = self.fetch(session_id).await?;
        if let Err(e) = self.store.save(&dataset).await {
            tracing::warn!(session_id, error = %e, "Failed to cache dataset");
        }
        Ok(OpenedWork {
            dataset,
            origin: DatasetOrigin::Network,
            refresh: None,
        })
    }

    /// Fetch and validate a work without touching the cache.
    pub async fn fetch(&self, session_id: &str) -> Result<WorkDataset, CatalogError> {
        let fetched = self.provider.fetch_work(session_id).await?;
        if fetched.raw_marker_count == 0 {
            return Err(CatalogError::NoLocationData);
        }
        if fetched.dataset.markers.is_empty() {
            return Err(CatalogError::NoPlayableWork);
        }
        Ok(fetched.dataset)
    }

    /// Fetch a work and replace its cached copy.
    pub async fn refresh(&self, session_id: &str) -> Result<WorkDataset, CatalogError> {
        let dataset = self.fetch(session_id).await?;
        self.store.save(&dataset).await?;
        Ok(dataset)
    }

    /// The cached dataset, without contacting the provider.
    pub async fn cached(&self, session_id: &str) -> Result<Option<WorkDataset>, CatalogError> {
        Ok(self.store.load(session_id).await?)
    }

    fn spawn_refresh(&self, session_id: &str) -> JoinHandle<Option<WorkDataset>> {
        let catalog = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            match catalog.refresh(&session_id).await {
                Ok(dataset) => {
                    tracing::debug!(session_id = %session_id, "Background refresh complete");
                    Some(dataset)
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Background refresh failed");
                    None
                }
            }
        })
    }
}
