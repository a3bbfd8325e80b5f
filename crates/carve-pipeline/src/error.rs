//! Error types for the pipeline.

use carve_types::FileId;

/// Errors returned by pipeline stages.
///
/// Inside the batch pipeline these are caught by the orchestrator and turned
/// into Failed statuses on the affected records; on the restore path they
/// propagate to the caller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Checksum engine failure.
    #[error(transparent)]
    Checksum(#[from] carve_checksum::ChecksumError),

    /// Storage backend failure.
    #[error(transparent)]
    Store(#[from] carve_store::StoreError),

    /// Metadata store failure.
    #[error(transparent)]
    Meta(#[from] carve_meta::MetaError),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stage's precondition does not hold (zero chunks, missing staging
    /// directory, missing source file).
    #[error("precondition failure: {0}")]
    Precondition(String),

    /// No backend produced the chunk at the given index during reconstruction.
    #[error("chunk {index} ({name}) is unavailable on every backend")]
    ChunkUnavailable {
        /// Zero-based chunk index.
        index: u32,
        /// Derived chunk file name.
        name: String,
    },

    /// The reconstructed file's digest does not match the recorded one.
    #[error("checksum verification failed: expected {expected}, got {actual}")]
    Verification {
        /// Digest recorded at ingestion.
        expected: String,
        /// Digest of the reconstructed file.
        actual: String,
    },

    /// No file record exists for the given id.
    #[error("file record {0} not found")]
    FileNotFound(FileId),
}
