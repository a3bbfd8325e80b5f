//! Latency-injecting wrapper around a [`StorageBackend`].
//!
//! `SlowBackend` sleeps for a bounded random interval before forwarding each
//! call to the wrapped backend. The RNG is seeded, so a given seed always
//! produces the same delay sequence and test runs stay reproducible. With no
//! latency configured the wrapper is a pass-through.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::StoreError;
use crate::traits::StorageBackend;

/// Inclusive millisecond bounds for one class of operations.
#[derive(Clone, Copy)]
struct LatencyRange {
    min_ms: u64,
    max_ms: u64,
}

impl LatencyRange {
    const NONE: Self = Self {
        min_ms: 0,
        max_ms: 0,
    };

    fn sample(&self, rng: &Mutex<StdRng>) -> u64 {
        if self.max_ms == 0 {
            return 0;
        }
        if self.min_ms == self.max_ms {
            return self.min_ms;
        }
        rng.lock()
            .expect("lock poisoned")
            .random_range(self.min_ms..=self.max_ms)
    }
}

/// A [`StorageBackend`] that delays IO against an inner backend.
///
/// Useful for widening race windows in tests: timing bugs that never show
/// against an instant in-memory store tend to surface once downloads and
/// uploads take a few milliseconds each.
pub struct SlowBackend {
    inner: Arc<dyn StorageBackend>,
    reads: LatencyRange,
    writes: LatencyRange,
    rng: Mutex<StdRng>,
}

impl SlowBackend {
    /// Wrap a backend with no latency configured.
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            reads: LatencyRange::NONE,
            writes: LatencyRange::NONE,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Delay downloads by a uniform random `min_ms..=max_ms` milliseconds.
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.reads = LatencyRange { min_ms, max_ms };
        self
    }

    /// Delay uploads and cleanup by a uniform random `min_ms..=max_ms`
    /// milliseconds.
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.writes = LatencyRange { min_ms, max_ms };
        self
    }

    /// Reseed the delay sequence.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    async fn pause(&self, range: LatencyRange) {
        let ms = range.sample(&self.rng);
        if ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for SlowBackend {
    fn tag(&self) -> &str {
        self.inner.tag()
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.pause(self.writes).await;
        self.inner.upload(name, data).await
    }

    async fn download(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        self.pause(self.reads).await;
        self.inner.download(name).await
    }

    async fn clean_up(&self) -> Result<(), StoreError> {
        self.pause(self.writes).await;
        self.inner.clean_up().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    #[test]
    fn test_sample_stays_within_bounds() {
        let rng = Mutex::new(StdRng::seed_from_u64(7));
        let range = LatencyRange {
            min_ms: 3,
            max_ms: 9,
        };
        for _ in 0..100 {
            let ms = range.sample(&rng);
            assert!((3..=9).contains(&ms), "sampled {ms} out of range");
        }
    }

    #[test]
    fn test_sample_degenerate_ranges() {
        let rng = Mutex::new(StdRng::seed_from_u64(0));
        assert_eq!(LatencyRange::NONE.sample(&rng), 0);
        let fixed = LatencyRange {
            min_ms: 4,
            max_ms: 4,
        };
        assert_eq!(fixed.sample(&rng), 4);
    }

    #[tokio::test]
    async fn test_wrapper_preserves_backend_behaviour() {
        let slow = SlowBackend::new(Arc::new(MemoryStore::new("mem")))
            .read_latency(1, 2)
            .write_latency(1, 2)
            .seed(42);
        assert_eq!(slow.tag(), "mem");

        let data = Bytes::from_static(b"delayed payload");
        slow.upload("tok.part_0", data.clone()).await.unwrap();
        assert_eq!(slow.download("tok.part_0").await.unwrap(), Some(data));
        assert_eq!(slow.download("missing").await.unwrap(), None);

        slow.clean_up().await.unwrap();
        assert_eq!(slow.download("tok.part_0").await.unwrap(), None);
    }
}
