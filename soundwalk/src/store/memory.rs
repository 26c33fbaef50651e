//! In-memory dataset store, for tests and `--no-cache` runs.

use std::collections::HashMap;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use super::{DatasetStore, StoreError};
use crate::model::WorkDataset;

#[derive(Debug, Default)]
pub struct MemoryStore {
    datasets: RwLock<HashMap<String, WorkDataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.datasets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.read().is_empty()
    }
}

impl DatasetStore for MemoryStore {
    fn load<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<WorkDataset>, StoreError>> {
        let found = self.datasets.read().get(session_id).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn save<'a>(&'a self, dataset: &'a WorkDataset) -> BoxFuture<'a, Result<(), StoreError>> {
        self.datasets
            .write()
            .insert(dataset.session_id.clone(), dataset.clone());
        Box::pin(async { Ok(()) })
    }

    fn remove<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        let removed = self.datasets.write().remove(session_id).is_some();
        Box::pin(async move { Ok(removed) })
    }
}
