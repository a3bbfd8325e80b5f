//! Filesystem-backed chunk storage.
//!
//! Stores one file per chunk, flat under a base directory. Uploads replace
//! any existing entry with the same name.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::StorageBackend;

/// Filesystem chunk store.
///
/// Writes are atomic: data is written to a temporary file first, then
/// renamed into place. This prevents corrupted chunks from partial writes.
pub struct FsStore {
    tag: String,
    base_dir: PathBuf,
}

impl FsStore {
    /// Create a new filesystem store rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(tag: impl Into<String>, base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            tag: tag.into(),
            base_dir,
        })
    }

    fn chunk_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }
}

#[async_trait::async_trait]
impl StorageBackend for FsStore {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        let path = self.chunk_path(name);

        // Atomic write: write to a temp file in the same directory, then rename.
        // This ensures we never leave a half-written chunk on disk. The temp
        // name appends to the full chunk name so sibling parts never collide.
        let tmp_path = self.base_dir.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(name, path = %path.display(), size = data.len(), "stored chunk to file");
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        let path = self.chunk_path(name);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn clean_up(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(&self.base_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;
        debug!(tag = %self.tag, dir = %self.base_dir.display(), "cleared chunk directory");
        Ok(())
    }
}
