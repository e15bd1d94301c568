//! Idempotent local cache of stored objects.
//!
//! A storage key maps to one deterministic path under the work directory. An
//! existing non-empty file is reused; otherwise the object is downloaded to a
//! temp file next to its final path and renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use pixq_media::fs_utils::{move_file, write_atomic};
use pixq_storage::ObjectStore;

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Object missing or transport failure
    #[error("Failed to fetch object: {0}")]
    Fetch(String),

    /// Local write failed
    #[error("Failed to write local copy: {0}")]
    Write(String),

    #[error("Storage key escapes the work directory: {0}")]
    InvalidKey(String),
}

impl FetchError {
    /// Only keys that can never map to a local path are permanent.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetchError::InvalidKey(_))
    }
}

/// Ensures stored objects exist in the local work directory.
#[derive(Clone)]
pub struct MediaFetcher {
    store: Arc<dyn ObjectStore>,
    cache_dir: PathBuf,
}

impl MediaFetcher {
    pub fn new(store: Arc<dyn ObjectStore>, work_dir: impl AsRef<Path>) -> Self {
        Self {
            store,
            cache_dir: work_dir.as_ref().join("cache"),
        }
    }

    /// Local path for `key`, whether or not it exists yet.
    pub fn local_path(&self, key: &str) -> FetchResult<PathBuf> {
        let trimmed = key.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('/')
            || trimmed.contains('\\')
            || trimmed.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(FetchError::InvalidKey(key.to_string()));
        }
        Ok(self.cache_dir.join(trimmed))
    }

    /// Make sure the object for `key` is on local disk and return its path.
    ///
    /// Downloads only when no non-empty local copy exists.
    pub async fn ensure(&self, key: &str) -> FetchResult<PathBuf> {
        let path = self.local_path(key)?;

        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.is_file() && meta.len() > 0 {
                debug!("Using cached copy of {} at {}", key, path.display());
                return Ok(path);
            }
        }

        let data = self
            .store
            .get(key)
            .await
            .map_err(|e| FetchError::Fetch(format!("{}: {}", key, e)))?;
        let size = data.len();

        write_atomic(&path, data)
            .await
            .map_err(|e| FetchError::Write(format!("{}: {}", path.display(), e)))?;

        debug!("Fetched {} ({} bytes) to {}", key, size, path.display());
        Ok(path)
    }

    /// Move a locally produced file into the cache slot of `key`.
    ///
    /// Used after an upload so a successor reading `key` on this worker
    /// skips the download.
    pub async fn adopt(&self, key: &str, file: &Path) -> FetchResult<PathBuf> {
        let path = self.local_path(key)?;
        move_file(file, &path)
            .await
            .map_err(|e| FetchError::Write(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixq_storage::MemoryObjectStore;

    fn fetcher(store: Arc<MemoryObjectStore>) -> (MediaFetcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (MediaFetcher::new(store, dir.path()), dir)
    }

    #[tokio::test]
    async fn test_ensure_downloads_once() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("images/cat.png", vec![1, 2, 3], "image/png");
        let (fetcher, _dir) = fetcher(store.clone());

        let first = fetcher.ensure("images/cat.png").await.unwrap();
        let second = fetcher.ensure("images/cat.png").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.get_count(), 1);
        assert_eq!(std::fs::read(&first).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_local_file_is_refetched() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("images/a.png", vec![7], "image/png");
        let (fetcher, _dir) = fetcher(store.clone());

        let path = fetcher.local_path("images/a.png").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();

        fetcher.ensure("images/a.png").await.unwrap();
        assert_eq!(store.get_count(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_missing_object_is_fetch_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, _dir) = fetcher(store);

        let err = fetcher.ensure("images/missing.png").await.unwrap_err();
        assert!(matches!(err, FetchError::Fetch(_)));
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_transport_failure_then_success() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("images/b.png", vec![4], "image/png");
        store.fail_next_gets(1);
        let (fetcher, _dir) = fetcher(store.clone());

        assert!(matches!(fetcher.ensure("images/b.png").await, Err(FetchError::Fetch(_))));
        assert!(fetcher.ensure("images/b.png").await.is_ok());
        assert_eq!(store.get_count(), 2);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (fetcher, _dir) = fetcher(Arc::new(MemoryObjectStore::new()));
        for key in ["", "/etc/passwd", "a/../../b", "a//b", "./a"] {
            assert!(
                matches!(fetcher.ensure(key).await, Err(FetchError::InvalidKey(_))),
                "{:?} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_adopt_fills_cache_slot() {
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, dir) = fetcher(store.clone());
        let produced = dir.path().join("cat-job1.png");
        std::fs::write(&produced, b"out").unwrap();

        let cached = fetcher.adopt("outputs/img/job1.png", &produced).await.unwrap();
        assert!(!produced.exists());

        assert_eq!(fetcher.ensure("outputs/img/job1.png").await.unwrap(), cached);
        assert_eq!(store.get_count(), 0);
    }
}
