//! Shared types and identifiers for carve.
//!
//! This crate defines the records used across the carve workspace:
//! identifiers ([`FileId`], [`ChunkId`]), persisted records ([`FileRecord`],
//! [`ChunkRecord`], [`BlobRecord`]), and the closed enumerations
//! ([`ProcessingStatus`], [`ChecksumAlgorithm`]) they carry.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Placeholder for a record not yet persisted.
            pub const UNASSIGNED: Self = Self(0);

            /// Return the raw sequence number.
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Sequence identifier for a [`FileRecord`], assigned by the metadata store.
    FileId
);

define_id!(
    /// Sequence identifier for a [`ChunkRecord`], assigned by the metadata store.
    ChunkId
);

// ---------------------------------------------------------------------------
// Closed enumerations
// ---------------------------------------------------------------------------

/// Processing state shared by files and chunks.
///
/// `Created → Processing → {Completed | Failed}`. Completed and Failed are
/// terminal for the record itself; a file's aggregate status may still be
/// recomputed from its chunks by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    /// Record exists but its stage has not started.
    Created,
    /// The corresponding stage is underway.
    Processing,
    /// The stage finished successfully.
    Completed,
    /// The stage failed; chunks carry the reason in `error_reason`.
    Failed,
}

impl ProcessingStatus {
    /// Canonical string form, used wherever the status leaves the process.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Created => "created",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Parse the canonical string form, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(ProcessingStatus::Created),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string that matches none of the known variants.
#[derive(Debug, thiserror::Error)]
#[error("unknown processing status: {0}")]
pub struct UnknownStatus(pub String);

/// Checksum algorithm recorded on a [`FileRecord`].
///
/// A closed set; the same tag stamped at ingestion must be reused for
/// verification after reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// A source file being driven through the split/distribute pipeline.
///
/// The `token` is a globally-unique opaque string that names the per-file
/// staging directory and every chunk file derived from it. `chunk_count` is
/// set only after splitting completes; `checksum` is computed once at
/// ingestion and never recomputed for the same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Store-assigned identifier.
    pub id: FileId,
    /// Opaque unique token naming staging folders and chunk files.
    pub token: String,
    /// Display name of the original file.
    pub file_name: String,
    /// Size of the original file in bytes.
    pub file_size: u64,
    /// Creation timestamp of the original file (unix seconds).
    pub file_created_at: u64,
    /// Extension of the original file, including the leading dot if any.
    pub extension: String,
    /// Hex digest stamped at ingestion.
    pub checksum: String,
    /// Algorithm used to compute `checksum`.
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Number of chunks produced by the split; 0 until the split completes.
    pub chunk_count: u32,
    /// Current pipeline status.
    pub status: ProcessingStatus,
    /// When this record was created (unix seconds).
    pub created_at: u64,
    /// When this record was last written (unix seconds).
    pub updated_at: u64,
}

impl FileRecord {
    /// Deterministic name of the chunk file at `index`: `{token}.part_{index}`.
    pub fn chunk_file_name(&self, index: u32) -> String {
        format!("{}.part_{}", self.token, index)
    }
}

/// One staged chunk of a file, bound to a single storage backend.
///
/// There is exactly one record per `(file, index, backend)`; when several
/// backends are active the same index is replicated once per backend, all
/// sharing the same derived file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Store-assigned identifier.
    pub id: ChunkId,
    /// Owning file.
    pub file_id: FileId,
    /// Zero-based position within the file, contiguous `0..chunk_count`.
    pub index: u32,
    /// Chunk file name derived from the owning file's token and `index`.
    pub file_name: String,
    /// Size of the chunk in bytes.
    pub size: u64,
    /// When this record was created (unix seconds).
    pub created_at: u64,
    /// Tag of the storage backend this chunk is assigned to.
    pub backend: String,
    /// Current upload status.
    pub status: ProcessingStatus,
    /// Human-readable failure reason; empty unless `status` is Failed.
    pub error_reason: String,
}

/// A named blob persisted inside the metadata store.
///
/// Backing record for the record-backed storage backend: the chunk bytes are
/// base64-encoded and stored as a field, addressed by name, unique per name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Blob name (a chunk file name).
    pub name: String,
    /// Base64-encoded content.
    pub content: String,
    /// When this blob was stored (unix seconds).
    pub created_at: u64,
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
