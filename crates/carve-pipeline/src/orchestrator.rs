//! Batch orchestration: drives many files through the pipeline concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use carve_meta::MetaStore;
use carve_types::{ChunkRecord, FileId, FileRecord, ProcessingStatus, now_secs};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::processor::FileProcessor;

/// Result of driving one source path through the batch pipeline.
pub struct BatchOutcome {
    /// The submitted source path.
    pub path: PathBuf,
    /// The persisted file id and its final status, or the error that stopped
    /// the file before a record could be driven to a terminal status.
    pub result: Result<(FileId, ProcessingStatus), PipelineError>,
}

/// Sequences split, distribute and finalize for many files concurrently.
///
/// The file-level gate bounds how many files are in flight at once; it is
/// independent of the processor's split gate, so distributions of several
/// files can overlap while their splits stay capped. All metadata writes
/// happen here; stage failures are converted to Failed statuses on the
/// affected file without touching its siblings.
pub struct Orchestrator {
    processor: Arc<FileProcessor>,
    meta: Arc<MetaStore>,
    file_gate: Arc<Semaphore>,
}

impl Orchestrator {
    /// Create an orchestrator with the given file-level concurrency bound.
    pub fn new(
        processor: Arc<FileProcessor>,
        meta: Arc<MetaStore>,
        max_concurrent_files: usize,
    ) -> Self {
        Self {
            processor,
            meta,
            file_gate: Arc::new(Semaphore::new(max_concurrent_files)),
        }
    }

    /// Process a batch of source paths concurrently.
    ///
    /// Each path becomes its own task gated by the file-level semaphore. A
    /// failure in one file never aborts the others; the returned outcomes
    /// report each file individually.
    pub async fn process_batch(self: Arc<Self>, paths: Vec<PathBuf>) -> Vec<BatchOutcome> {
        let mut join_set = JoinSet::new();
        for path in paths {
            let this = Arc::clone(&self);
            join_set.spawn(async move {
                let _permit = this
                    .file_gate
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore closed");
                let result = this.process_file(&path).await;
                BatchOutcome { path, result }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "pipeline task panicked"),
            }
        }
        outcomes
    }

    /// Drive a single source file through ingest → split → distribute.
    ///
    /// Stage results are matched explicitly: a failed stage marks the file
    /// Failed, persists that, and short-circuits the remaining stages.
    /// Returned errors are reserved for failures before a record exists or
    /// for metadata store failures that prevent persisting any status.
    pub async fn process_file(
        &self,
        source: &Path,
    ) -> Result<(FileId, ProcessingStatus), PipelineError> {
        let mut file = self.processor.ingest(source).await?;
        file.id = self.meta.allocate_file_id()?;
        self.meta.put_file(&file)?;
        info!(file_id = %file.id, source = %source.display(), token = %file.token, "file ingested");

        file.status = ProcessingStatus::Processing;
        self.persist_file(&mut file)?;

        match self.processor.split(&file, source).await {
            Ok(sizes) => {
                file.chunk_count = sizes.len() as u32;
                self.persist_file(&mut file)?;

                let mut chunks = self.processor.build_chunk_records(&file, &sizes);
                for chunk in &mut chunks {
                    chunk.id = self.meta.allocate_chunk_id()?;
                }
                self.meta.insert_chunks(&chunks)?;

                match self.processor.distribute(&file, &mut chunks).await {
                    Ok(()) => {
                        for chunk in &chunks {
                            self.meta.put_chunk(chunk)?;
                        }
                        file.status = aggregate_status(&chunks);
                        self.persist_file(&mut file)?;

                        if file.status == ProcessingStatus::Completed {
                            if let Err(e) = self.processor.clear_staging(&file.token).await {
                                warn!(file_id = %file.id, error = %e, "staging cleanup failed");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(file_id = %file.id, error = %e, "distribution failed");
                        file.status = ProcessingStatus::Failed;
                        self.persist_file(&mut file)?;
                    }
                }
            }
            Err(e) => {
                warn!(file_id = %file.id, error = %e, "split failed");
                file.status = ProcessingStatus::Failed;
                self.persist_file(&mut file)?;
            }
        }

        info!(file_id = %file.id, status = %file.status, "file processing finished");
        Ok((file.id, file.status))
    }

    /// Reconstruct and verify a previously distributed file.
    ///
    /// Unlike the batch pipeline, errors here are not downgraded to a status;
    /// they propagate to the caller, with any partial output already removed.
    pub async fn restore(
        &self,
        file_id: FileId,
        destination_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let file = self
            .meta
            .get_file(file_id)?
            .ok_or(PipelineError::FileNotFound(file_id))?;
        let chunks = self.meta.chunks_for_file(file_id)?;

        let path = self
            .processor
            .reconstruct(&file, &chunks, destination_dir)
            .await?;
        self.processor.verify(&file, &path).await?;

        info!(file_id = %file.id, path = %path.display(), "file restored and verified");
        Ok(path)
    }

    fn persist_file(&self, file: &mut FileRecord) -> Result<(), PipelineError> {
        file.updated_at = now_secs();
        self.meta.put_file(file)?;
        Ok(())
    }
}

/// A file's aggregate status from its chunk outcomes: Failed if any chunk
/// failed, Completed otherwise.
pub fn aggregate_status(chunks: &[ChunkRecord]) -> ProcessingStatus {
    if chunks
        .iter()
        .any(|c| c.status == ProcessingStatus::Failed)
    {
        ProcessingStatus::Failed
    } else {
        ProcessingStatus::Completed
    }
}
