//! In-memory chunk storage for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use crate::error::StoreError;
use crate::traits::StorageBackend;

/// In-memory chunk store backed by a `HashMap`.
///
/// Primarily useful for tests and single-process setups.
pub struct MemoryStore {
    tag: String,
    chunks: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            chunks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.read().expect("lock poisoned").len()
    }

    /// Whether the store holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryStore {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.chunks
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), data);
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.chunks.read().expect("lock poisoned").get(name).cloned())
    }

    async fn clean_up(&self) -> Result<(), StoreError> {
        self.chunks.write().expect("lock poisoned").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let store = MemoryStore::new("mem");
        let data = Bytes::from_static(b"in memory");

        store.upload("tok.part_0", data.clone()).await.unwrap();
        assert_eq!(store.download("tok.part_0").await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_download_nonexistent_returns_none() {
        let store = MemoryStore::new("mem");
        assert_eq!(store.download("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clean_up_empties_store() {
        let store = MemoryStore::new("mem");
        store
            .upload("a", Bytes::from_static(b"one"))
            .await
            .unwrap();
        store
            .upload("b", Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        store.clean_up().await.unwrap();
        assert!(store.is_empty());
    }
}
