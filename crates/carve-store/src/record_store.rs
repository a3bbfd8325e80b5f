//! Record-backed chunk storage.
//!
//! Stores chunk payloads as base64 text inside blob records in the metadata
//! database, so a deployment can run without any chunk directory on disk.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use carve_meta::MetaStore;
use carve_types::{BlobRecord, now_secs};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::StorageBackend;

/// Chunk store that persists payloads as records in the metadata database.
pub struct RecordStore {
    tag: String,
    meta: Arc<MetaStore>,
}

impl RecordStore {
    /// Create a record store over the given metadata database.
    pub fn new(tag: impl Into<String>, meta: Arc<MetaStore>) -> Self {
        Self {
            tag: tag.into(),
            meta,
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for RecordStore {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        let record = BlobRecord {
            name: name.to_string(),
            content: BASE64.encode(&data),
            created_at: now_secs(),
        };
        self.meta.put_blob(&record)?;
        debug!(name, size = data.len(), "stored chunk as blob record");
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        let Some(record) = self.meta.get_blob(name)? else {
            return Ok(None);
        };
        let data = BASE64
            .decode(record.content.as_bytes())
            .map_err(|e| StoreError::Decode {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(Bytes::from(data)))
    }

    async fn clean_up(&self) -> Result<(), StoreError> {
        self.meta.delete_blobs()?;
        debug!(tag = %self.tag, "cleared blob records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> RecordStore {
        let meta = Arc::new(MetaStore::open_temporary().unwrap());
        RecordStore::new("db", meta)
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let store = make_store();
        let data = Bytes::from_static(b"record payload");

        store.upload("tok.part_0", data.clone()).await.unwrap();
        let result = store.download("tok.part_0").await.unwrap();
        assert_eq!(result, Some(data));
    }

    #[tokio::test]
    async fn test_download_nonexistent_returns_none() {
        let store = make_store();
        assert_eq!(store.download("missing.part_0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_payload_stored_as_base64() {
        let store = make_store();
        let data = Bytes::from_static(b"binary \x00\x01\x02 bytes");

        store.upload("tok.part_0", data.clone()).await.unwrap();

        let record = store.meta.get_blob("tok.part_0").unwrap().unwrap();
        assert_eq!(record.content, BASE64.encode(&data));
    }

    #[tokio::test]
    async fn test_corrupt_record_returns_decode_error() {
        let store = make_store();
        store
            .meta
            .put_blob(&BlobRecord {
                name: "bad.part_0".into(),
                content: "not valid base64 !!!".into(),
                created_at: now_secs(),
            })
            .unwrap();

        let result = store.download("bad.part_0").await;
        assert!(matches!(result, Err(StoreError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_clean_up_removes_all_records() {
        let store = make_store();
        store
            .upload("a.part_0", Bytes::from_static(b"one"))
            .await
            .unwrap();
        store
            .upload("b.part_0", Bytes::from_static(b"two"))
            .await
            .unwrap();

        store.clean_up().await.unwrap();

        assert_eq!(store.download("a.part_0").await.unwrap(), None);
        assert_eq!(store.download("b.part_0").await.unwrap(), None);
    }
}
