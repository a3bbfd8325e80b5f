//! [`MetaStore`] implementation wrapping Fjall keyspaces.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use carve_types::{BlobRecord, ChunkId, ChunkRecord, FileId, FileRecord};
use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tracing::debug;

use crate::MetaError;

type Result<T> = std::result::Result<T, MetaError>;

const SEQ_FILE: &[u8] = b"file";
const SEQ_CHUNK: &[u8] = b"chunk";

/// Metadata store backed by Fjall.
///
/// Id allocation goes through process-local atomic counters initialized from
/// the `sequences` keyspace at open and persisted write-through on every
/// allocation, so concurrent pipeline tasks never hand out duplicate ids and
/// no global lock over the store is needed.
pub struct MetaStore {
    /// The underlying Fjall database handle.
    #[allow(dead_code)]
    db: Database,
    /// FileId (8 bytes BE) → serialized FileRecord.
    files: Keyspace,
    /// ChunkId (8 bytes BE) → serialized ChunkRecord.
    chunks: Keyspace,
    /// file_id (8 BE) ++ index (4 BE) ++ backend tag → ChunkId (8 BE).
    chunk_index: Keyspace,
    /// Blob name → serialized BlobRecord.
    blobs: Keyspace,
    /// Sequence name → next id (8 bytes BE).
    sequences: Keyspace,
    next_file_id: AtomicU64,
    next_chunk_id: AtomicU64,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db)
    }

    /// Open a temporary MetaStore that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db)
    }

    fn init_keyspaces(db: Database) -> Result<Self> {
        let files = db.keyspace("files", KeyspaceCreateOptions::default)?;
        let chunks = db.keyspace("chunks", KeyspaceCreateOptions::default)?;
        let chunk_index = db.keyspace("chunk_index", KeyspaceCreateOptions::default)?;
        let blobs = db.keyspace("blobs", KeyspaceCreateOptions::default)?;
        let sequences = db.keyspace("sequences", KeyspaceCreateOptions::default)?;

        let next_file_id = AtomicU64::new(load_sequence(&sequences, SEQ_FILE)?);
        let next_chunk_id = AtomicU64::new(load_sequence(&sequences, SEQ_CHUNK)?);

        Ok(Self {
            db,
            files,
            chunks,
            chunk_index,
            blobs,
            sequences,
            next_file_id,
            next_chunk_id,
        })
    }

    // ----- Id allocation -----

    /// Allocate the next file id.
    pub fn allocate_file_id(&self) -> Result<FileId> {
        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        self.sequences.insert(SEQ_FILE, (id + 1).to_be_bytes())?;
        Ok(FileId::from(id))
    }

    /// Allocate the next chunk id.
    pub fn allocate_chunk_id(&self) -> Result<ChunkId> {
        let id = self.next_chunk_id.fetch_add(1, Ordering::SeqCst);
        self.sequences.insert(SEQ_CHUNK, (id + 1).to_be_bytes())?;
        Ok(ChunkId::from(id))
    }

    // ----- File records -----

    /// Insert or overwrite a file record, keyed by its id.
    pub fn put_file(&self, record: &FileRecord) -> Result<()> {
        let value = postcard::to_allocvec(record)?;
        self.files
            .insert(record.id.as_u64().to_be_bytes(), value.as_slice())?;
        debug!(file_id = %record.id, status = %record.status, "stored file record");
        Ok(())
    }

    /// Retrieve a file record by id.
    pub fn get_file(&self, id: FileId) -> Result<Option<FileRecord>> {
        match self.files.get(id.as_u64().to_be_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether a file record exists.
    pub fn file_exists(&self, id: FileId) -> Result<bool> {
        Ok(self.files.get(id.as_u64().to_be_bytes())?.is_some())
    }

    /// List all file records, ascending by id.
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        for guard in self.files.iter() {
            let v = guard.value()?;
            records.push(postcard::from_bytes(&v)?);
        }
        Ok(records)
    }

    // ----- Chunk records -----

    /// Bulk-insert freshly created chunk records.
    ///
    /// Writes both the record and its `(file, index, backend)` index entry;
    /// re-inserting the same combination overwrites rather than duplicates.
    pub fn insert_chunks(&self, records: &[ChunkRecord]) -> Result<()> {
        for record in records {
            let value = postcard::to_allocvec(record)?;
            self.chunks
                .insert(record.id.as_u64().to_be_bytes(), value.as_slice())?;
            let key = chunk_index_key(record.file_id, record.index, &record.backend);
            self.chunk_index
                .insert(key.as_slice(), record.id.as_u64().to_be_bytes())?;
        }
        debug!(count = records.len(), "bulk-inserted chunk records");
        Ok(())
    }

    /// Overwrite an existing chunk record (status/error updates).
    pub fn put_chunk(&self, record: &ChunkRecord) -> Result<()> {
        let value = postcard::to_allocvec(record)?;
        self.chunks
            .insert(record.id.as_u64().to_be_bytes(), value.as_slice())?;
        Ok(())
    }

    /// Retrieve a chunk record by id.
    pub fn get_chunk(&self, id: ChunkId) -> Result<Option<ChunkRecord>> {
        match self.chunks.get(id.as_u64().to_be_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Retrieve all chunks of a file, ordered by index (then backend tag).
    ///
    /// The index keyspace key is `file_id ++ index ++ backend` in big-endian,
    /// so a prefix scan already yields ascending index order.
    pub fn chunks_for_file(&self, file_id: FileId) -> Result<Vec<ChunkRecord>> {
        let prefix = file_id.as_u64().to_be_bytes();
        let mut records = Vec::new();
        for guard in self.chunk_index.prefix(prefix) {
            let v = guard.value()?;
            let arr: [u8; 8] = v[..8].try_into().expect("ChunkId is 8 bytes");
            let chunk_id = ChunkId::from(u64::from_be_bytes(arr));
            if let Some(record) = self.get_chunk(chunk_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // ----- Stored blobs (record-backed storage backend) -----

    /// Store a named blob, overwriting any existing blob of the same name.
    pub fn put_blob(&self, record: &BlobRecord) -> Result<()> {
        let value = postcard::to_allocvec(record)?;
        self.blobs.insert(record.name.as_bytes(), value.as_slice())?;
        debug!(name = %record.name, "stored blob record");
        Ok(())
    }

    /// Retrieve a blob by name.
    pub fn get_blob(&self, name: &str) -> Result<Option<BlobRecord>> {
        match self.blobs.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete every stored blob.
    pub fn delete_blobs(&self) -> Result<()> {
        let mut names = Vec::new();
        for guard in self.blobs.iter() {
            names.push(guard.key()?.to_vec());
        }
        let count = names.len();
        for name in names {
            self.blobs.remove(name.as_slice())?;
        }
        debug!(count, "deleted all blob records");
        Ok(())
    }
}

/// Load a persisted sequence value, defaulting to 1 so 0 stays unassigned.
fn load_sequence(sequences: &Keyspace, name: &[u8]) -> Result<u64> {
    match sequences.get(name)? {
        Some(bytes) => {
            let arr: [u8; 8] = bytes[..8].try_into().expect("sequence is 8 bytes");
            Ok(u64::from_be_bytes(arr))
        }
        None => Ok(1),
    }
}

/// Build the chunk index key: `file_id (8 BE) ++ index (4 BE) ++ backend tag`.
///
/// Big-endian ensures lexicographic ordering matches numeric ordering.
fn chunk_index_key(file_id: FileId, index: u32, backend: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(12 + backend.len());
    key.extend_from_slice(&file_id.as_u64().to_be_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key.extend_from_slice(backend.as_bytes());
    key
}
