//! Metadata persistence layer wrapping Fjall.
//!
//! [`MetaStore`] provides typed accessors over the keyspaces backing the
//! pipeline's records:
//!
//! - `files` — [`FileId`](carve_types::FileId) → serialized [`FileRecord`](carve_types::FileRecord)
//! - `chunks` — [`ChunkId`](carve_types::ChunkId) → serialized [`ChunkRecord`](carve_types::ChunkRecord)
//! - `chunk_index` — `(file_id, index, backend)` → chunk id; gives ordered
//!   per-file lookup and makes the `(file, index, backend)` combination unique
//! - `blobs` — blob name → serialized [`BlobRecord`](carve_types::BlobRecord)
//!   (backing table for the record-backed storage backend)
//! - `sequences` — persisted high-water marks for id allocation

mod error;
mod store;

pub use error::MetaError;
pub use store::MetaStore;
