//! Error types for checksum computation.

/// Errors that can occur while selecting an algorithm or computing a digest.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// The algorithm name matches none of the supported set.
    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// An I/O error occurred while streaming the input. No partial digest
    /// is ever returned.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
