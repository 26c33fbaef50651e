//! JSON file store.
//!
//! Each session is one file, `audio_data_{session_id}.json`, inside the
//! cache directory. Writes go to a temporary file first and are renamed into
//! place, so a crash mid-write never leaves a truncated dataset behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;

use super::{DatasetStore, StoreError};
use crate::model::WorkDataset;

/// Dataset store writing one JSON file per session.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of a session's file. Characters outside `[A-Za-z0-9_-]` are
    /// replaced so a session id can never escape the directory.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("audio_data_{}.json", safe))
    }

    async fn load_inner(&self, session_id: &str) -> Result<Option<WorkDataset>, StoreError> {
        let path = self.path_for(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let dataset = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(session_id, path = %path.display(), "Loaded cached dataset");
        Ok(Some(dataset))
    }

    async fn save_inner(&self, dataset: &WorkDataset) -> Result<(), StoreError> {
        let json =
            serde_json::to_vec_pretty(dataset).map_err(|e| StoreError::Serialize(e.to_string()))?;

        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.path_for(&dataset.session_id);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(
            session_id = %dataset.session_id,
            path = %path.display(),
            bytes = json.len(),
            "Saved dataset"
        );
        Ok(())
    }

    async fn remove_inner(&self, session_id: &str) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl DatasetStore for JsonFileStore {
    fn load<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<WorkDataset>, StoreError>> {
        Box::pin(self.load_inner(session_id))
    }

    fn save<'a>(&'a self, dataset: &'a WorkDataset) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.save_inner(dataset))
    }

    fn remove<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(self.remove_inner(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioRecord, MarkerPoint, WorkInfo};
    use tempfile::TempDir;

    fn dataset(session_id: &str) -> WorkDataset {
        WorkDataset::new(
            session_id,
            WorkInfo {
                title: Some("Harbour Walk".into()),
                description: None,
            },
            vec![MarkerPoint::new(35.0, 139.0).with_record(
                AudioRecord::new("r1", 0.0, 50.0)
                    .with_trim(Some(1.0), Some(20.0))
                    .with_loop(true),
            )],
        )
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let ds = dataset("user-1");

        store.save(&ds).await.unwrap();
        let loaded = store.load("user-1").await.unwrap();

        assert_eq!(loaded, Some(ds));
        assert!(dir.path().join("audio_data_user-1.json").exists());
        assert!(!dir.path().join("audio_data_user-1.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert_eq!(store.load("nobody").await.unwrap(), None);
        assert!(!store.remove("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("cache"));

        store.save(&dataset("u")).await.unwrap();

        assert!(store.load("u").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.path_for("bad"), b"{ not json").unwrap();

        assert!(matches!(
            store.load("bad").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&dataset("u")).await.unwrap();

        assert!(store.remove("u").await.unwrap());
        assert_eq!(store.load("u").await.unwrap(), None);
    }

    #[test]
    fn test_session_id_cannot_escape_directory() {
        let store = JsonFileStore::new("/cache");
        assert_eq!(
            store.path_for("../etc/passwd"),
            PathBuf::from("/cache/audio_data____etc_passwd.json")
        );
    }
}
