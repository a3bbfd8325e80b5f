//! Core trait for chunk storage backends.

use bytes::Bytes;

use crate::error::StoreError;

/// Trait for storing and retrieving chunk payloads by name.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Data is passed as [`Bytes`] to enable zero-copy transfers through the pipeline.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short tag identifying this backend (e.g. `"fs"`). Recorded on each
    /// chunk so retrieval knows where to look.
    fn tag(&self) -> &str;

    /// Store a payload under the given name, replacing any existing entry.
    async fn upload(&self, name: &str, data: Bytes) -> Result<(), StoreError>;

    /// Retrieve a payload by name. Returns `None` if not found.
    async fn download(&self, name: &str) -> Result<Option<Bytes>, StoreError>;

    /// Remove everything this backend holds.
    async fn clean_up(&self) -> Result<(), StoreError>;
}
