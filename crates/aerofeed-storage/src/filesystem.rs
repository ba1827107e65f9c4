//! Local filesystem backend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::{
    FlightStore, LoadOptions, SaveOptions, StorageBackend, StorageError, StorageKey, StoreFuture,
    StoredFlightEntry,
};

/// Writes one pretty-printed JSON document per key under `base_dir`.
///
/// The file itself is the existence check: saving overwrites in place, reading
/// back the previous `created_at` when a readable entry is already there.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    base_dir: PathBuf,
}

impl FileSystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.base_dir.join(key.relative_path())
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<StoredFlightEntry>, StorageError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|error| StorageError::Corrupt {
                path: path.display().to_string(),
                message: error.to_string(),
            })
    }
}

impl FlightStore for FileSystemStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::FileSystem
    }

    fn save<'a>(
        &'a self,
        key: &'a StorageKey,
        data: &'a Value,
        options: &'a SaveOptions,
    ) -> StoreFuture<'a, StoredFlightEntry> {
        Box::pin(async move {
            let path = self.path_for(key);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // An unreadable previous file is overwritten rather than blocking the save.
            let previous = self.read_entry(&path).await.ok().flatten();
            let entry =
                StoredFlightEntry::upserted(key, data, options, previous.map(|p| p.created_at));

            let mut body = serde_json::to_vec_pretty(&entry)?;
            body.push(b'\n');
            tokio::fs::write(&path, body).await?;

            tracing::debug!(path = %path.display(), "wrote flight entry");
            Ok(entry)
        })
    }

    fn load<'a>(
        &'a self,
        key: &'a StorageKey,
        _options: &'a LoadOptions,
    ) -> StoreFuture<'a, Option<StoredFlightEntry>> {
        Box::pin(async move { self.read_entry(&self.path_for(key)).await })
    }

    fn exists<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(tokio::fs::try_exists(self.path_for(key)).await?) })
    }

    fn delete<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => Ok(true),
                Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
                Err(error) => Err(error.into()),
            }
        })
    }
}
