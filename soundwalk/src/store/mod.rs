//! Persisted cache of fetched work datasets.
//!
//! Only the last fetched dataset per session is kept. There is no sync
//! protocol: a newer fetch simply replaces the stored copy.
//!
//! # Dyn Compatibility
//!
//! [`DatasetStore`] returns boxed futures so the catalog can hold an
//! `Arc<dyn DatasetStore>` and tests can swap in [`MemoryStore`].

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::model::WorkDataset;

/// Errors that can occur while reading or writing the dataset cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error during cache operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored file could not be parsed.
    #[error("corrupt cache file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// A dataset could not be serialized.
    #[error("failed to serialize dataset: {0}")]
    Serialize(String),
}

/// Cache of work datasets keyed by session id.
pub trait DatasetStore: Send + Sync {
    /// Load the stored dataset, if any.
    fn load<'a>(&'a self, session_id: &'a str)
        -> BoxFuture<'a, Result<Option<WorkDataset>, StoreError>>;

    /// Store a dataset, replacing any previous copy for its session.
    fn save<'a>(&'a self, dataset: &'a WorkDataset) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Remove the stored dataset. Returns whether one existed.
    fn remove<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;
}
