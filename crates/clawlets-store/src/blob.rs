//! Blob store seam for large result payloads.
//!
//! The blob store is not transactional with the document store: database
//! rows are authoritative and blob deletes are always best-effort. Orphaned
//! blobs are tolerated.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::StoreError;

/// Content-addressed-ish blob storage. Ids are opaque strings minted by the
/// backend on `put`.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store a blob, returning its storage id.
    async fn put(&self, bytes: &[u8]) -> Result<String, StoreError>;

    /// Fetch a blob by id. Returns `Ok(None)` if the id is unknown.
    async fn get(&self, storage_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a blob. Idempotent.
    async fn delete(&self, storage_id: &str) -> Result<(), StoreError>;
}

/// In-memory blob store for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let id = Uuid::new_v4().as_simple().to_string();
        self.blobs.write().await.insert(id.clone(), bytes.to_vec());
        Ok(id)
    }

    async fn get(&self, storage_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().await.get(storage_id).cloned())
    }

    async fn delete(&self, storage_id: &str) -> Result<(), StoreError> {
        self.blobs.write().await.remove(storage_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let store = MemoryBlobStore::new();
        let id = store.put(b"payload").await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(b"payload".to_vec()));
        store.delete(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_unknown_is_noop() {
        let store = MemoryBlobStore::new();
        store.delete("nope").await.unwrap();
    }
}
