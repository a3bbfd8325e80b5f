//! Chunk storage backends.
//!
//! A [`StorageBackend`] stores chunk payloads by name. Implementations:
//!
//! - [`FsStore`] — one file per chunk under a base directory
//! - [`RecordStore`] — payloads as base64 blob records in the metadata database
//! - [`MemoryStore`] — in-memory map, for tests
//! - [`SlowBackend`] — latency-injecting wrapper around any backend
//!
//! [`BackendRegistry`] maps the tags recorded on chunk records to live
//! backends at runtime.

mod error;
mod fs_store;
mod memory_store;
mod record_store;
mod registry;
mod slow;
mod traits;

pub use error::StoreError;
pub use fs_store::FsStore;
pub use memory_store::MemoryStore;
pub use record_store::RecordStore;
pub use registry::BackendRegistry;
pub use slow::SlowBackend;
pub use traits::StorageBackend;
