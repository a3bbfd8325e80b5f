//! Per-file processing stages: split, distribute, reconstruct, verify.
//!
//! [`FileProcessor`] owns the staging area and the split concurrency gate but
//! never touches the metadata store; it mutates the records handed to it and
//! leaves persistence to the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use carve_store::BackendRegistry;
use carve_types::{
    ChecksumAlgorithm, ChunkId, ChunkRecord, FileId, FileRecord, ProcessingStatus, now_secs,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;

/// Tuning knobs for [`FileProcessor`].
pub struct ProcessorConfig {
    /// Base directory under which per-file staging directories are created.
    pub staging_root: PathBuf,
    /// Maximum size of one chunk in bytes. Must be non-zero.
    pub max_chunk_bytes: u64,
    /// Algorithm used to stamp and verify file checksums.
    pub checksum_algorithm: ChecksumAlgorithm,
    /// How many splits may run concurrently, across all files.
    pub max_concurrent_splits: usize,
}

/// Drives a single file through its stages.
///
/// Splits share a bounded gate to cap disk pressure; distribution and
/// reconstruction within one file are strictly sequential. Chunk indices are
/// always processed in ascending order, which the merge step relies on.
pub struct FileProcessor {
    config: ProcessorConfig,
    registry: Arc<BackendRegistry>,
    split_gate: Semaphore,
    splits_in_flight: AtomicUsize,
    split_high_water: AtomicUsize,
}

impl FileProcessor {
    /// Create a processor, ensuring the staging root exists.
    pub fn new(
        config: ProcessorConfig,
        registry: Arc<BackendRegistry>,
    ) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&config.staging_root)?;
        let split_gate = Semaphore::new(config.max_concurrent_splits);
        Ok(Self {
            config,
            registry,
            split_gate,
            splits_in_flight: AtomicUsize::new(0),
            split_high_water: AtomicUsize::new(0),
        })
    }

    /// Staging directory for a file token.
    fn staging_dir(&self, token: &str) -> PathBuf {
        self.config.staging_root.join(token)
    }

    /// Peak number of splits observed running at once.
    #[cfg(test)]
    pub(crate) fn split_high_water(&self) -> usize {
        self.split_high_water.load(Ordering::SeqCst)
    }

    /// Build a fresh file record for a source path.
    ///
    /// Stats the source, mints the unique token, and stamps the checksum.
    /// The checksum is computed exactly once here and never recomputed for
    /// the same record. The id stays unassigned until the record is persisted.
    pub async fn ingest(&self, source: &Path) -> Result<FileRecord, PipelineError> {
        let meta = match tokio::fs::metadata(source).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return Err(PipelineError::Precondition(format!(
                    "{} is not a regular file",
                    source.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::Precondition(format!(
                    "source file {} does not exist",
                    source.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let file_created_at = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_else(now_secs);

        let algorithm = self.config.checksum_algorithm;
        let checksum = carve_checksum::digest_file(algorithm, source).await?;
        let now = now_secs();

        Ok(FileRecord {
            id: FileId::UNASSIGNED,
            token: Uuid::new_v4().to_string(),
            file_name,
            file_size: meta.len(),
            file_created_at,
            extension,
            checksum,
            checksum_algorithm: algorithm,
            chunk_count: 0,
            status: ProcessingStatus::Created,
            created_at: now,
            updated_at: now,
        })
    }

    /// Split a source file into staged chunk files.
    ///
    /// Waits on the split gate, destroys and recreates the staging directory,
    /// then writes chunks of up to `max_chunk_bytes` named
    /// `{token}.part_{index}` in ascending index order. Returns the chunk
    /// sizes in index order; an empty source yields an empty vec. On any
    /// mid-split I/O failure the staging directory is removed and the error
    /// propagated, leaving no partial chunk set behind.
    pub async fn split(
        &self,
        file: &FileRecord,
        source: &Path,
    ) -> Result<Vec<u64>, PipelineError> {
        let _permit = self.split_gate.acquire().await.expect("semaphore closed");

        let active = self.splits_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.split_high_water.fetch_max(active, Ordering::SeqCst);
        debug!(file_id = %file.id, source = %source.display(), active, "split started");

        let result = self.split_inner(file, source).await;
        self.splits_in_flight.fetch_sub(1, Ordering::SeqCst);

        if result.is_err() {
            let staging = self.staging_dir(&file.token);
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %staging.display(), error = %e, "failed to remove partial staging dir");
                }
            }
        }
        result
    }

    async fn split_inner(
        &self,
        file: &FileRecord,
        source: &Path,
    ) -> Result<Vec<u64>, PipelineError> {
        let staging = self.staging_dir(&file.token);
        match tokio::fs::remove_dir_all(&staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&staging).await?;

        let mut reader = tokio::fs::File::open(source).await?;
        let mut sizes = Vec::new();
        let mut index = 0u32;

        loop {
            let chunk_path = staging.join(file.chunk_file_name(index));
            let mut out = tokio::fs::File::create(&chunk_path).await?;
            let mut limited = (&mut reader).take(self.config.max_chunk_bytes);
            let written = tokio::io::copy(&mut limited, &mut out).await?;
            out.flush().await?;

            if written == 0 {
                // Source exhausted exactly at a chunk boundary (or empty).
                tokio::fs::remove_file(&chunk_path).await?;
                break;
            }

            sizes.push(written);
            index += 1;
            if written < self.config.max_chunk_bytes {
                break;
            }
        }

        info!(
            file_id = %file.id,
            source = %source.display(),
            chunks = sizes.len(),
            "split completed"
        );
        Ok(sizes)
    }

    /// Build chunk records for a completed split.
    ///
    /// One record per `(index, active backend)`, so with several backends
    /// registered the same index is replicated once per backend under the
    /// same derived file name. Ids stay unassigned until persistence.
    pub fn build_chunk_records(&self, file: &FileRecord, sizes: &[u64]) -> Vec<ChunkRecord> {
        let now = now_secs();
        let mut records = Vec::with_capacity(sizes.len() * self.registry.len());
        for (index, &size) in sizes.iter().enumerate() {
            let index = index as u32;
            for tag in self.registry.tags() {
                records.push(ChunkRecord {
                    id: ChunkId::UNASSIGNED,
                    file_id: file.id,
                    index,
                    file_name: file.chunk_file_name(index),
                    size,
                    created_at: now,
                    backend: tag.clone(),
                    status: ProcessingStatus::Created,
                    error_reason: String::new(),
                });
            }
        }
        records
    }

    /// Upload every staged chunk to its assigned backend, sequentially.
    ///
    /// Preconditions (missing staging directory or zero chunks) fail the
    /// whole distribution before any backend is touched. After that each
    /// chunk is attempted exactly once: success marks it Completed, any
    /// failure (missing staged file, unknown backend tag, upload error)
    /// marks it Failed with the reason captured, and the loop moves on.
    /// Aggregating chunk outcomes into the file status is the caller's job.
    pub async fn distribute(
        &self,
        file: &FileRecord,
        chunks: &mut [ChunkRecord],
    ) -> Result<(), PipelineError> {
        let staging = self.staging_dir(&file.token);
        match tokio::fs::metadata(&staging).await {
            Ok(m) if m.is_dir() => {}
            _ => {
                return Err(PipelineError::Precondition(format!(
                    "staging directory {} does not exist",
                    staging.display()
                )));
            }
        }
        if file.chunk_count == 0 || chunks.is_empty() {
            return Err(PipelineError::Precondition(format!(
                "file {} has 0 chunks",
                file.file_name
            )));
        }

        for chunk in chunks.iter_mut() {
            chunk.status = ProcessingStatus::Processing;

            let data = match tokio::fs::read(staging.join(&chunk.file_name)).await {
                Ok(data) => data,
                Err(e) => {
                    fail_chunk(chunk, format!("reading staged chunk: {e}"));
                    continue;
                }
            };

            let backend = match self.registry.resolve(&chunk.backend) {
                Ok(backend) => backend,
                Err(e) => {
                    fail_chunk(chunk, e.to_string());
                    continue;
                }
            };

            match backend.upload(&chunk.file_name, Bytes::from(data)).await {
                Ok(()) => {
                    chunk.status = ProcessingStatus::Completed;
                    debug!(
                        file_id = %file.id,
                        chunk = %chunk.file_name,
                        backend = %chunk.backend,
                        "chunk uploaded"
                    );
                }
                Err(e) => fail_chunk(chunk, e.to_string()),
            }
        }

        info!(file_id = %file.id, chunks = chunks.len(), "distribution pass completed");
        Ok(())
    }

    /// Download and merge a file's chunks into `destination_dir`.
    ///
    /// Chunks already present in the staging area are not re-downloaded, so a
    /// repeated attempt against the same staging area resumes where the last
    /// one stopped. When replicas exist on several backends, any one of them
    /// satisfies an index; an index no backend can produce fails the merge
    /// with [`PipelineError::ChunkUnavailable`] rather than writing a
    /// truncated file. The staging directory is removed regardless of
    /// outcome. Checksum verification is the caller's separate step.
    pub async fn reconstruct(
        &self,
        file: &FileRecord,
        chunks: &[ChunkRecord],
        destination_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        if file.chunk_count == 0 || chunks.is_empty() {
            return Err(PipelineError::Precondition(format!(
                "file {} has 0 chunks",
                file.file_name
            )));
        }

        let staging = self.staging_dir(&file.token);
        tokio::fs::create_dir_all(&staging).await?;

        let result = self
            .download_and_merge(file, chunks, &staging, destination_dir)
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "failed to remove staging dir");
            }
        }
        result
    }

    async fn download_and_merge(
        &self,
        file: &FileRecord,
        chunks: &[ChunkRecord],
        staging: &Path,
        destination_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        for chunk in chunks {
            let chunk_path = staging.join(&chunk.file_name);
            if tokio::fs::try_exists(&chunk_path).await? {
                debug!(chunk = %chunk.file_name, "staged copy present, skipping download");
                continue;
            }

            let backend = match self.registry.resolve(&chunk.backend) {
                Ok(backend) => backend,
                Err(e) => {
                    // A replica on another backend may still cover this index.
                    warn!(chunk = %chunk.file_name, backend = %chunk.backend, error = %e,
                        "cannot resolve chunk backend");
                    continue;
                }
            };

            match backend.download(&chunk.file_name).await? {
                Some(data) => {
                    tokio::fs::write(&chunk_path, &data).await?;
                    debug!(
                        chunk = %chunk.file_name,
                        backend = %chunk.backend,
                        size = data.len(),
                        "chunk downloaded"
                    );
                }
                None => {
                    debug!(chunk = %chunk.file_name, backend = %chunk.backend,
                        "chunk absent on backend");
                }
            }
        }

        // Every index must be covered by some backend before merging;
        // anything less would silently produce a truncated file.
        for index in 0..file.chunk_count {
            let name = file.chunk_file_name(index);
            if !tokio::fs::try_exists(staging.join(&name)).await? {
                return Err(PipelineError::ChunkUnavailable { index, name });
            }
        }

        let out_path = destination_dir.join(&file.file_name);
        let merge = self.concat_chunks(file, staging, &out_path).await;
        if merge.is_err() {
            // Never leave a partially written output behind.
            let _ = tokio::fs::remove_file(&out_path).await;
        }
        merge?;

        info!(file_id = %file.id, path = %out_path.display(), "file reconstructed");
        Ok(out_path)
    }

    /// Concatenate staged chunks in ascending index order into `out_path`,
    /// overwriting any existing file.
    async fn concat_chunks(
        &self,
        file: &FileRecord,
        staging: &Path,
        out_path: &Path,
    ) -> Result<(), PipelineError> {
        let mut out = tokio::fs::File::create(out_path).await?;
        for index in 0..file.chunk_count {
            let chunk_path = staging.join(file.chunk_file_name(index));
            let mut chunk = tokio::fs::File::open(&chunk_path).await?;
            tokio::io::copy(&mut chunk, &mut out).await?;
        }
        out.flush().await?;
        Ok(())
    }

    /// Verify a reconstructed file against the record's stamped checksum.
    ///
    /// On mismatch the reconstructed file is removed before the error
    /// surfaces, so no incorrect output is left at the destination.
    pub async fn verify(&self, file: &FileRecord, path: &Path) -> Result<(), PipelineError> {
        let actual = carve_checksum::digest_file(file.checksum_algorithm, path).await?;
        if carve_checksum::matches(&actual, &file.checksum) {
            debug!(file_id = %file.id, "checksum verified");
            return Ok(());
        }

        warn!(file_id = %file.id, expected = %file.checksum, %actual, "checksum mismatch");
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove mismatched output");
            }
        }
        Err(PipelineError::Verification {
            expected: file.checksum.clone(),
            actual,
        })
    }

    /// Remove a file's staging directory if present.
    pub async fn clear_staging(&self, token: &str) -> Result<(), PipelineError> {
        let staging = self.staging_dir(token);
        match tokio::fs::remove_dir_all(&staging).await {
            Ok(()) => {
                debug!(path = %staging.display(), "staging dir removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn fail_chunk(chunk: &mut ChunkRecord, reason: String) {
    warn!(chunk = %chunk.file_name, backend = %chunk.backend, %reason, "chunk failed");
    chunk.status = ProcessingStatus::Failed;
    chunk.error_reason = reason;
}
