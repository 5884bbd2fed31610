// Object-store collaborator trait.
//
// The core never talks to a concrete SDK (§1: "the concrete object store SDK"
// is an external collaborator). `ObjectStore` is the seam; production wiring
// supplies an S3-backed impl, tests supply `InMemoryObjectStore`. Keyed by
// (bucket, key) exactly like S3's addressing, since the replica record
// already speaks in those terms (primary/read-only/standby bucket names).

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;

use crate::error::{DbError, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<()> {
        let bytes = self.get(bucket, src_key).await?;
        self.put(bucket, dst_key, bytes).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Download `bucket/key` to a local filesystem path, creating parent
    /// directories as needed.
    async fn download_to(&self, bucket: &str, key: &str, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = self.get(bucket, key).await?;
        tokio::fs::write(target, bytes).await?;
        Ok(())
    }

    /// Upload a local filesystem path to `bucket/key`.
    async fn upload_from(&self, bucket: &str, key: &str, source: &Path) -> Result<()> {
        let bytes = tokio::fs::read(source).await?;
        self.put(bucket, key, bytes).await
    }
}

/// In-memory fake used by tests and local development. Not a cache — an
/// actual backing store, keyed by `(bucket, key)`.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<(String, String), Vec<u8>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects.insert((bucket.to_string(), key.to_string()), bytes);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|v| v.clone())
            .ok_or_else(|| DbError::Storage(format!("object not found: {bucket}/{key}")))
    }

    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(&(bucket.to_string(), key.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryObjectStore::new();
        store.put("b", "k", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("b", "k").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_storage_error() {
        let store = InMemoryObjectStore::new();
        let err = store.get("b", "missing").await.unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn copy_duplicates_bytes_under_new_key() {
        let store = InMemoryObjectStore::new();
        store.put("b", "src", b"x".to_vec()).await.unwrap();
        store.copy("b", "src", "dst").await.unwrap();
        assert_eq!(store.get("b", "dst").await.unwrap(), b"x");
    }
}
