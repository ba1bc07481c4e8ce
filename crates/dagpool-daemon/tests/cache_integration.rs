// crates/dagpool-daemon/tests/cache_integration.rs
//
// Integration tests for the DAG pool service.
//
// Drives the DAG cache with the Keccak generator and an on-disk directory the
// way the daemon does: a chain advancing block by block across epoch
// boundaries, a restart that reuses memoized datasets, and shutdown.
//
// These tests use the public APIs of the library crates directly
// (dagpool-core, dagpool-cache) since the daemon is a binary crate with no
// lib.rs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dagpool_cache::{DagCache, DagCacheConfig, KeccakDagGenerator};
use dagpool_core::{ChainParams, DagError, DagGenerator, DatasetState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const EPOCH_LENGTH: u64 = 5;
const DATASET_BYTES: usize = 512;

/// Create a temporary directory path using UUID to avoid conflicts.
fn temp_dag_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dagpool_test_{}_{}", label, Uuid::now_v7()))
}

/// Keccak generator that also counts how many datasets it was asked for.
struct CountingKeccak {
    inner: KeccakDagGenerator,
    calls: AtomicUsize,
}

impl CountingKeccak {
    fn new() -> Self {
        Self {
            inner: KeccakDagGenerator::new(DATASET_BYTES),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DagGenerator for CountingKeccak {
    async fn generate(
        &self,
        epoch: u64,
        directory: &Path,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, DagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.generate(epoch, directory, cancel).await
    }
}

fn make_cache(generator: Arc<dyn DagGenerator>, dir: &Path, capacity: usize) -> DagCache {
    DagCache::with_config(
        generator,
        ChainParams::custom(EPOCH_LENGTH).unwrap(),
        DagCacheConfig {
            capacity,
            directory: dir.to_path_buf(),
        },
    )
    .unwrap()
}

async fn wait_until_staged_ready(cache: &DagCache) {
    for _ in 0..400 {
        let snapshot = cache.snapshot().unwrap();
        if matches!(snapshot.staged, Some((_, DatasetState::Ready))) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("staged dataset never became ready");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chain_progression_uses_pre_generated_datasets() {
    let dir = temp_dag_dir("progression");
    let generator = Arc::new(CountingKeccak::new());
    let cache = make_cache(generator.clone(), &dir, 2);
    let token = CancellationToken::new();

    // Walk three full epochs block by block, giving the background
    // generation time to finish before each boundary.
    for height in 0..(3 * EPOCH_LENGTH) {
        let dataset = cache.get_dataset(height, &token).await.unwrap();
        assert_eq!(dataset.epoch(), height / EPOCH_LENGTH);
        assert_eq!(dataset.len(), DATASET_BYTES);

        if height % EPOCH_LENGTH == EPOCH_LENGTH - 1 {
            wait_until_staged_ready(&cache).await;
        }

        let snapshot = cache.snapshot().unwrap();
        assert!(snapshot.resident.len() <= 2);
    }

    // Epoch 0 from the first miss, then epochs 1, 2 and 3 staged after hits.
    // Every boundary adopts the staged dataset instead of generating again.
    assert_eq!(generator.calls(), 4);

    let snapshot = cache.snapshot().unwrap();
    assert_eq!(snapshot.resident_epochs(), vec![1, 2]);
    assert_eq!(snapshot.staged_epoch(), Some(3));

    for epoch in 0..4 {
        assert!(dir.join(KeccakDagGenerator::dataset_file_name(epoch)).exists());
    }

    cache.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_restart_reuses_memoized_datasets() {
    let dir = temp_dag_dir("restart");
    let token = CancellationToken::new();

    let first = make_cache(Arc::new(KeccakDagGenerator::new(DATASET_BYTES)), &dir, 3);
    let original = first.get_dataset(12, &token).await.unwrap();
    let original_bytes = original.payload().unwrap().to_vec();
    first.shutdown().await;

    // The handle outlives the cache; its buffer is still intact.
    assert_eq!(original.payload().unwrap(), &original_bytes[..]);

    let second = make_cache(Arc::new(KeccakDagGenerator::new(DATASET_BYTES)), &dir, 3);
    let reloaded = second.get_dataset(14, &token).await.unwrap();
    assert_eq!(reloaded.epoch(), 2);
    assert_eq!(reloaded.payload().unwrap(), &original_bytes[..]);
    assert!(!Arc::ptr_eq(&original, &reloaded));

    second.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_many_pool_workers_share_one_generation() {
    let dir = temp_dag_dir("workers");
    let generator = Arc::new(CountingKeccak::new());
    let cache = Arc::new(make_cache(generator.clone(), &dir, 3));

    let mut handles = Vec::new();
    for worker in 0..16u64 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            // Every worker asks for a different height inside epoch 7.
            let height = 7 * EPOCH_LENGTH + worker % EPOCH_LENGTH;
            cache.get_dataset(height, &CancellationToken::new()).await
        }));
    }

    let mut datasets = Vec::new();
    for handle in handles {
        datasets.push(handle.await.unwrap().unwrap());
    }
    assert!(datasets.iter().all(|ds| Arc::ptr_eq(ds, &datasets[0])));
    assert_eq!(datasets[0].epoch(), 7);

    cache.shutdown().await;
    // One run for epoch 7, at most one more for the staged epoch 8.
    assert!(generator.calls() <= 2);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_lookups_after_shutdown_fail() {
    let dir = temp_dag_dir("shutdown");
    let cache = make_cache(Arc::new(KeccakDagGenerator::new(DATASET_BYTES)), &dir, 3);
    let token = CancellationToken::new();

    cache.get_dataset(0, &token).await.unwrap();
    cache.get_dataset(1, &token).await.unwrap();
    cache.shutdown().await;

    assert_eq!(
        cache.get_dataset(0, &token).await.unwrap_err(),
        DagError::NotConfigured
    );
    assert!(cache.snapshot().is_err());
    let _ = std::fs::remove_dir_all(&dir);
}
