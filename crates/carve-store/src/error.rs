//! Error types for storage backends.

/// Errors returned by storage backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No backend is registered under the given tag.
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    /// Stored payload could not be decoded back into bytes.
    #[error("failed to decode stored payload for {name}: {reason}")]
    Decode {
        /// Name of the stored object.
        name: String,
        /// Why decoding failed.
        reason: String,
    },

    /// Metadata store error (record-backed backend).
    #[error(transparent)]
    Meta(#[from] carve_meta::MetaError),
}
