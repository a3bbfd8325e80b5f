//! End-to-end pipeline tests over in-memory backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use carve_meta::MetaStore;
use carve_store::{BackendRegistry, MemoryStore, SlowBackend, StorageBackend, StoreError};
use carve_types::{ChecksumAlgorithm, FileId, ProcessingStatus};
use tempfile::TempDir;

use crate::{FileProcessor, Orchestrator, PipelineError, ProcessorConfig};

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// Deterministic pseudo-random test data.
fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Upload wrapper that fails any chunk whose name ends with a given suffix.
struct FlakyUpload {
    inner: MemoryStore,
    fail_suffix: String,
}

#[async_trait]
impl StorageBackend for FlakyUpload {
    fn tag(&self) -> &str {
        self.inner.tag()
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        if name.ends_with(&self.fail_suffix) {
            return Err(StoreError::Io(std::io::Error::other(
                "injected upload fault",
            )));
        }
        self.inner.upload(name, data).await
    }

    async fn download(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        self.inner.download(name).await
    }

    async fn clean_up(&self) -> Result<(), StoreError> {
        self.inner.clean_up().await
    }
}

/// Download wrapper that pretends a chunk with a given suffix is absent.
struct DroppedDownload {
    inner: MemoryStore,
    drop_suffix: String,
}

#[async_trait]
impl StorageBackend for DroppedDownload {
    fn tag(&self) -> &str {
        self.inner.tag()
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.inner.upload(name, data).await
    }

    async fn download(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        if name.ends_with(&self.drop_suffix) {
            return Ok(None);
        }
        self.inner.download(name).await
    }

    async fn clean_up(&self) -> Result<(), StoreError> {
        self.inner.clean_up().await
    }
}

/// Wrapper that counts every upload and download call.
struct CountingBackend {
    inner: MemoryStore,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl StorageBackend for CountingBackend {
    fn tag(&self) -> &str {
        self.inner.tag()
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(name, data).await
    }

    async fn download(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.download(name).await
    }

    async fn clean_up(&self) -> Result<(), StoreError> {
        self.inner.clean_up().await
    }
}

struct Fixture {
    orchestrator: Arc<Orchestrator>,
    processor: Arc<FileProcessor>,
    meta: Arc<MetaStore>,
    root: TempDir,
}

impl Fixture {
    fn with_backends(
        backends: Vec<Arc<dyn StorageBackend>>,
        max_chunk_bytes: u64,
        max_concurrent_splits: usize,
        max_concurrent_files: usize,
    ) -> Self {
        let root = TempDir::new().unwrap();
        let meta = Arc::new(MetaStore::open_temporary().unwrap());

        let mut registry = BackendRegistry::new();
        for backend in backends {
            registry.register(backend);
        }

        let processor = Arc::new(
            FileProcessor::new(
                ProcessorConfig {
                    staging_root: root.path().join("staging"),
                    max_chunk_bytes,
                    checksum_algorithm: ChecksumAlgorithm::Sha256,
                    max_concurrent_splits,
                },
                Arc::new(registry),
            )
            .unwrap(),
        );

        let orchestrator = Arc::new(Orchestrator::new(
            processor.clone(),
            meta.clone(),
            max_concurrent_files,
        ));

        Fixture {
            orchestrator,
            processor,
            meta,
            root,
        }
    }

    fn new(max_chunk_bytes: u64) -> Self {
        Self::with_backends(
            vec![Arc::new(MemoryStore::new("mem"))],
            max_chunk_bytes,
            2,
            3,
        )
    }

    /// Write test content under a fresh source path.
    fn source(&self, name: &str, data: &[u8]) -> PathBuf {
        let dir = self.root.path().join("sources");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn out_dir(&self) -> PathBuf {
        let dir = self.root.path().join("out");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn staging_entries(&self) -> usize {
        std::fs::read_dir(self.root.path().join("staging"))
            .unwrap()
            .count()
    }
}

#[tokio::test]
async fn test_split_produces_expected_chunk_sizes() {
    let fx = Fixture::new(3 * KIB as u64);
    let source = fx.source("data.bin", &test_data(10 * KIB));

    let file = fx.processor.ingest(&source).await.unwrap();
    let sizes = fx.processor.split(&file, &source).await.unwrap();

    assert_eq!(sizes, vec![3072, 3072, 3072, 1024]);
    for index in 0..4 {
        let chunk = fx
            .root
            .path()
            .join("staging")
            .join(&file.token)
            .join(file.chunk_file_name(index));
        assert!(chunk.exists(), "missing chunk file {}", chunk.display());
    }
}

#[tokio::test]
async fn test_ten_mib_file_three_mib_chunks_round_trip() {
    let fx = Fixture::new(3 * MIB as u64);
    let data = test_data(10 * MIB);
    let source = fx.source("big.bin", &data);

    let (file_id, status) = fx.orchestrator.process_file(&source).await.unwrap();
    assert_eq!(status, ProcessingStatus::Completed);

    let file = fx.meta.get_file(file_id).unwrap().unwrap();
    assert_eq!(file.chunk_count, 4);

    let chunks = fx.meta.chunks_for_file(file_id).unwrap();
    let sizes: Vec<u64> = chunks.iter().map(|c| c.size).collect();
    assert_eq!(
        sizes,
        vec![3 * MIB as u64, 3 * MIB as u64, 3 * MIB as u64, MIB as u64]
    );
    let indices: Vec<u32> = chunks.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);

    let restored = fx.orchestrator.restore(file_id, &fx.out_dir()).await.unwrap();
    assert_eq!(std::fs::read(restored).unwrap(), data);
}

#[tokio::test]
async fn test_round_trip_preserves_bytes_and_clears_staging() {
    let fx = Fixture::new(16 * KIB as u64);
    let data = test_data(100_000);
    let source = fx.source("doc.pdf", &data);

    let outcomes = fx.orchestrator.clone().process_batch(vec![source]).await;
    assert_eq!(outcomes.len(), 1);
    let (file_id, status) = *outcomes[0].result.as_ref().unwrap();
    assert_eq!(status, ProcessingStatus::Completed);

    // Staging for a completed file is removed.
    assert_eq!(fx.staging_entries(), 0);

    let file = fx.meta.get_file(file_id).unwrap().unwrap();
    assert_eq!(file.status, ProcessingStatus::Completed);
    assert_eq!(file.file_size, 100_000);
    assert_eq!(file.extension, ".pdf");

    let restored = fx.orchestrator.restore(file_id, &fx.out_dir()).await.unwrap();
    assert_eq!(restored.file_name().unwrap(), "doc.pdf");
    assert_eq!(std::fs::read(restored).unwrap(), data);

    // Restore cleans its own staging too.
    assert_eq!(fx.staging_entries(), 0);
}

#[tokio::test]
async fn test_single_upload_fault_isolates_chunk() {
    let flaky = FlakyUpload {
        inner: MemoryStore::new("mem"),
        fail_suffix: ".part_1".to_string(),
    };
    let fx = Fixture::with_backends(vec![Arc::new(flaky)], 2 * KIB as u64, 2, 3);
    let source = fx.source("data.bin", &test_data(7 * KIB));

    let (file_id, status) = fx.orchestrator.process_file(&source).await.unwrap();
    assert_eq!(status, ProcessingStatus::Failed);

    let chunks = fx.meta.chunks_for_file(file_id).unwrap();
    assert_eq!(chunks.len(), 4);
    for chunk in &chunks {
        if chunk.index == 1 {
            assert_eq!(chunk.status, ProcessingStatus::Failed);
            assert!(!chunk.error_reason.is_empty());
            assert!(chunk.error_reason.contains("injected upload fault"));
        } else {
            assert_eq!(chunk.status, ProcessingStatus::Completed);
            assert!(chunk.error_reason.is_empty());
        }
    }

    let file = fx.meta.get_file(file_id).unwrap().unwrap();
    assert_eq!(file.status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn test_checksum_mismatch_removes_output() {
    let fx = Fixture::new(8 * KIB as u64);
    let source = fx.source("data.bin", &test_data(20 * KIB));

    let (file_id, status) = fx.orchestrator.process_file(&source).await.unwrap();
    assert_eq!(status, ProcessingStatus::Completed);

    // Corrupt the recorded digest so verification must fail.
    let mut file = fx.meta.get_file(file_id).unwrap().unwrap();
    file.checksum = "00".repeat(32);
    fx.meta.put_file(&file).unwrap();

    let out_dir = fx.out_dir();
    let err = fx.orchestrator.restore(file_id, &out_dir).await.unwrap_err();
    assert!(matches!(err, PipelineError::Verification { .. }));
    assert!(
        !out_dir.join("data.bin").exists(),
        "mismatched output must be removed"
    );
}

#[tokio::test]
async fn test_zero_chunk_restore_fails_without_backend_calls() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counting = CountingBackend {
        inner: MemoryStore::new("mem"),
        calls: calls.clone(),
    };
    let fx = Fixture::with_backends(vec![Arc::new(counting)], 4 * KIB as u64, 2, 3);

    // A persisted record with zero chunks, as left behind by an empty source.
    let source = fx.source("empty.bin", &[]);
    let mut file = fx.processor.ingest(&source).await.unwrap();
    file.id = fx.meta.allocate_file_id().unwrap();
    fx.meta.put_file(&file).unwrap();

    let err = fx
        .orchestrator
        .restore(file.id, &fx.out_dir())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_source_fails_at_distribution() {
    let fx = Fixture::new(4 * KIB as u64);
    let source = fx.source("empty.bin", &[]);

    let (file_id, status) = fx.orchestrator.process_file(&source).await.unwrap();
    assert_eq!(status, ProcessingStatus::Failed);

    // The split itself succeeded with zero chunks; distribution refused it.
    let file = fx.meta.get_file(file_id).unwrap().unwrap();
    assert_eq!(file.chunk_count, 0);
    assert!(fx.meta.chunks_for_file(file_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_split_gate_bounds_concurrency() {
    let fx = Fixture::with_backends(
        vec![Arc::new(MemoryStore::new("mem"))],
        8 * KIB as u64,
        2,
        5,
    );

    let paths: Vec<PathBuf> = (0..5)
        .map(|i| fx.source(&format!("file-{i}.bin"), &test_data(64 * KIB)))
        .collect();

    let outcomes = fx.orchestrator.clone().process_batch(paths).await;
    assert_eq!(outcomes.len(), 5);
    for outcome in &outcomes {
        let (_, status) = *outcome.result.as_ref().unwrap();
        assert_eq!(status, ProcessingStatus::Completed);
    }

    let peak = fx.processor.split_high_water();
    assert!(peak >= 1, "at least one split must have run");
    assert!(peak <= 2, "split gate breached: {peak} concurrent splits");
}

#[tokio::test]
async fn test_missing_chunk_fails_restore() {
    let dropping = DroppedDownload {
        inner: MemoryStore::new("mem"),
        drop_suffix: ".part_2".to_string(),
    };
    let fx = Fixture::with_backends(vec![Arc::new(dropping)], 2 * KIB as u64, 2, 3);
    let source = fx.source("data.bin", &test_data(7 * KIB));

    let (file_id, status) = fx.orchestrator.process_file(&source).await.unwrap();
    assert_eq!(status, ProcessingStatus::Completed);

    let out_dir = fx.out_dir();
    let err = fx.orchestrator.restore(file_id, &out_dir).await.unwrap_err();
    assert!(
        matches!(err, PipelineError::ChunkUnavailable { index: 2, .. }),
        "expected ChunkUnavailable for index 2, got: {err:?}"
    );
    assert!(
        !out_dir.join("data.bin").exists(),
        "no truncated output may be written"
    );
}

#[tokio::test]
async fn test_replica_backend_covers_missing_chunk() {
    let dropping = DroppedDownload {
        inner: MemoryStore::new("mem_a"),
        drop_suffix: ".part_2".to_string(),
    };
    // The replica backend runs with injected latency to shake out ordering
    // assumptions between the two stores.
    let replica = SlowBackend::new(Arc::new(MemoryStore::new("mem_b")))
        .read_latency(1, 5)
        .write_latency(1, 5)
        .seed(42);
    let fx = Fixture::with_backends(
        vec![Arc::new(dropping), Arc::new(replica)],
        2 * KIB as u64,
        2,
        3,
    );
    let data = test_data(7 * KIB);
    let source = fx.source("data.bin", &data);

    let (file_id, status) = fx.orchestrator.process_file(&source).await.unwrap();
    assert_eq!(status, ProcessingStatus::Completed);

    // 4 indices replicated across 2 backends.
    assert_eq!(fx.meta.chunks_for_file(file_id).unwrap().len(), 8);

    let restored = fx.orchestrator.restore(file_id, &fx.out_dir()).await.unwrap();
    assert_eq!(std::fs::read(restored).unwrap(), data);
}

#[tokio::test]
async fn test_unknown_backend_tag_marks_chunk_failed() {
    let fx = Fixture::new(2 * KIB as u64);
    let source = fx.source("data.bin", &test_data(5 * KIB));

    let mut file = fx.processor.ingest(&source).await.unwrap();
    let sizes = fx.processor.split(&file, &source).await.unwrap();
    file.chunk_count = sizes.len() as u32;

    let mut chunks = fx.processor.build_chunk_records(&file, &sizes);
    chunks[0].backend = "ghost".to_string();

    fx.processor.distribute(&file, &mut chunks).await.unwrap();

    assert_eq!(chunks[0].status, ProcessingStatus::Failed);
    assert!(chunks[0].error_reason.contains("unknown storage backend"));
    for chunk in &chunks[1..] {
        assert_eq!(chunk.status, ProcessingStatus::Completed);
    }
}

#[tokio::test]
async fn test_batch_failure_is_isolated_per_file() {
    let fx = Fixture::new(4 * KIB as u64);
    let data = test_data(10 * KIB);
    let good = fx.source("good.bin", &data);
    let missing = fx.root.path().join("sources").join("missing.bin");

    let outcomes = fx
        .orchestrator
        .clone()
        .process_batch(vec![missing.clone(), good.clone()])
        .await;
    assert_eq!(outcomes.len(), 2);

    for outcome in &outcomes {
        if outcome.path == good {
            let (_, status) = *outcome.result.as_ref().unwrap();
            assert_eq!(status, ProcessingStatus::Completed);
        } else {
            assert_eq!(outcome.path, missing);
            assert!(matches!(
                outcome.result,
                Err(PipelineError::Precondition(_))
            ));
        }
    }
}

#[tokio::test]
async fn test_mid_split_failure_removes_staging() {
    let fx = Fixture::new(2 * KIB as u64);
    let source = fx.source("data.bin", &test_data(5 * KIB));

    let file = fx.processor.ingest(&source).await.unwrap();

    // A directory opens fine but errors on the first read, failing the
    // split after its staging directory and first chunk file exist.
    let dir_source = fx.root.path().join("sources");
    let err = fx.processor.split(&file, &dir_source).await.unwrap_err();
    assert!(matches!(err, PipelineError::Io(_)), "got: {err:?}");

    let staging = fx.root.path().join("staging").join(&file.token);
    assert!(
        !staging.exists(),
        "partial staging dir must be removed: {}",
        staging.display()
    );
}

#[tokio::test]
async fn test_restore_skips_chunks_already_staged() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counting = CountingBackend {
        inner: MemoryStore::new("mem"),
        calls: calls.clone(),
    };
    let fx = Fixture::with_backends(vec![Arc::new(counting)], 2 * KIB as u64, 2, 3);
    let data = test_data(7 * KIB);
    let source = fx.source("data.bin", &data);

    let (file_id, status) = fx.orchestrator.process_file(&source).await.unwrap();
    assert_eq!(status, ProcessingStatus::Completed);

    // Pre-stage index 1, as a previous interrupted restore would leave it.
    let file = fx.meta.get_file(file_id).unwrap().unwrap();
    let staging = fx.root.path().join("staging").join(&file.token);
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join(file.chunk_file_name(1)), &data[2048..4096]).unwrap();

    calls.store(0, Ordering::SeqCst);
    let restored = fx.orchestrator.restore(file_id, &fx.out_dir()).await.unwrap();
    assert_eq!(std::fs::read(restored).unwrap(), data);

    // Only the three missing indices were fetched; the staged one was not.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_restore_unknown_file_id_fails() {
    let fx = Fixture::new(4 * KIB as u64);
    let err = fx
        .orchestrator
        .restore(FileId::from(9_999), &fx.out_dir())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::FileNotFound(_)));
}
