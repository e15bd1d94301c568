//! In-memory object store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ObjectStore, Visibility};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    visibility: Visibility,
}

/// `ObjectStore` backed by a map, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    failing_gets: Mutex<u32>,
    get_calls: Mutex<u32>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an object directly.
    pub fn insert(&self, key: &str, data: Vec<u8>, content_type: &str) {
        self.objects().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                visibility: Visibility::Private,
            },
        );
    }

    /// Make the next `count` reads fail with a download error.
    pub fn fail_next_gets(&self, count: u32) {
        *self.failing_gets.lock().unwrap_or_else(PoisonError::into_inner) = count;
    }

    /// Number of `get` calls made so far, failed ones included.
    pub fn get_count(&self) -> u32 {
        *self.get_calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects().get(key).map(|o| o.content_type.clone())
    }

    pub fn visibility(&self, key: &str) -> Option<Visibility> {
        self.objects().get(key).map(|o| o.visibility)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        *self.get_calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        {
            let mut failing = self.failing_gets.lock().unwrap_or_else(PoisonError::into_inner);
            if *failing > 0 {
                *failing -= 1;
                return Err(StorageError::download_failed("injected failure"));
            }
        }
        self.objects()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        visibility: Visibility,
    ) -> StorageResult<String> {
        validate_key(key)?;
        self.objects().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                visibility,
            },
        );
        Ok(format!("memory://{}", key))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.objects().contains_key(key))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_exists() {
        let store = MemoryObjectStore::new();
        assert!(!store.exists("a/b.png").await.unwrap());

        let url = store
            .put("a/b.png", vec![1, 2, 3], "image/png", Visibility::PublicRead)
            .await
            .unwrap();
        assert_eq!(url, "memory://a/b.png");
        assert!(store.exists("a/b.png").await.unwrap());
        assert_eq!(store.get("a/b.png").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.visibility("a/b.png"), Some(Visibility::PublicRead));
        assert_eq!(store.content_type("a/b.png").as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.get("missing.png").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryObjectStore::new();
        store.insert("x.png", vec![9], "image/png");
        store.fail_next_gets(1);

        assert!(matches!(
            store.get("x.png").await,
            Err(StorageError::DownloadFailed(_))
        ));
        assert_eq!(store.get("x.png").await.unwrap(), vec![9]);
        assert_eq!(store.get_count(), 2);
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.put("../x", vec![], "image/png", Visibility::Private).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
