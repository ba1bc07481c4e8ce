// crates/dagpool-cache/src/generator.rs
//
// KeccakDagGenerator: deterministic dataset builder with on-disk memoization.
//
// The buffer is a Keccak-256 chain seeded with the epoch's seed hash. Built
// datasets are written to `<directory>/full-R23-<seed prefix>` so a restart
// can load them instead of rebuilding. An empty directory disables the disk
// layer.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha3::{Digest, Keccak256};
use tokio_util::sync::CancellationToken;

use dagpool_core::{seed_hash, DagError, DagGenerator};

/// Revision tag used in dataset file names.
const DATASET_REVISION: u32 = 23;

/// Bytes produced between two cancellation checks.
const CHUNK_BYTES: usize = 1 << 20;

/// Builds per-epoch datasets by chaining Keccak-256.
#[derive(Debug, Clone)]
pub struct KeccakDagGenerator {
    dataset_bytes: usize,
}

impl KeccakDagGenerator {
    /// Create a generator producing `dataset_bytes` per epoch, rounded up to
    /// a whole number of 32-byte words.
    pub fn new(dataset_bytes: usize) -> Self {
        let words = dataset_bytes.div_ceil(32).max(1);
        Self {
            dataset_bytes: words * 32,
        }
    }

    pub fn dataset_bytes(&self) -> usize {
        self.dataset_bytes
    }

    /// File name a dataset for `epoch` is stored under.
    pub fn dataset_file_name(epoch: u64) -> String {
        let seed = seed_hash(epoch);
        format!("full-R{}-{}", DATASET_REVISION, hex::encode(&seed[..8]))
    }

    fn dataset_path(directory: &Path, epoch: u64) -> Option<PathBuf> {
        if directory.as_os_str().is_empty() {
            None
        } else {
            Some(directory.join(Self::dataset_file_name(epoch)))
        }
    }

    /// Fill the dataset buffer. Runs on a blocking thread.
    fn build(
        epoch: u64,
        dataset_bytes: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, DagError> {
        let mut buffer = Vec::with_capacity(dataset_bytes);
        let mut word = seed_hash(epoch);

        while buffer.len() < dataset_bytes {
            if buffer.len() % CHUNK_BYTES == 0 && cancel.is_cancelled() {
                return Err(DagError::GenerationFailed(format!(
                    "generation for epoch {} was canceled",
                    epoch
                )));
            }
            let digest = Keccak256::digest(word);
            word.copy_from_slice(&digest);
            let take = (dataset_bytes - buffer.len()).min(word.len());
            buffer.extend_from_slice(&word[..take]);
        }

        Ok(buffer)
    }

    /// Load a previously stored dataset of the expected size.
    fn load(path: &Path, dataset_bytes: usize) -> Result<Option<Vec<u8>>, DagError> {
        match fs::read(path) {
            Ok(bytes) if bytes.len() == dataset_bytes => Ok(Some(bytes)),
            Ok(bytes) => {
                tracing::warn!(
                    "Ignoring DAG file {} with unexpected size {} (expected {})",
                    path.display(),
                    bytes.len(),
                    dataset_bytes
                );
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temporary file so readers never see a partial dataset.
    fn store(path: &Path, buffer: &[u8]) -> Result<(), DagError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(buffer)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load_or_build(
        epoch: u64,
        dataset_bytes: usize,
        directory: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, DagError> {
        let path = Self::dataset_path(directory, epoch);

        if let Some(path) = &path {
            if let Some(bytes) = Self::load(path, dataset_bytes)? {
                tracing::info!("Loaded DAG for epoch {} from {}", epoch, path.display());
                return Ok(bytes);
            }
        }

        let buffer = Self::build(epoch, dataset_bytes, cancel)?;

        if let Some(path) = &path {
            match Self::store(path, &buffer) {
                Ok(()) => tracing::debug!("Stored DAG for epoch {} at {}", epoch, path.display()),
                Err(e) => tracing::warn!(
                    "Could not store DAG for epoch {} at {}: {}",
                    epoch,
                    path.display(),
                    e
                ),
            }
        }

        Ok(buffer)
    }
}

#[async_trait]
impl DagGenerator for KeccakDagGenerator {
    async fn generate(
        &self,
        epoch: u64,
        directory: &Path,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, DagError> {
        let dataset_bytes = self.dataset_bytes;
        let directory = directory.to_path_buf();

        tokio::task::spawn_blocking(move || {
            tracing::debug!(
                "Building DAG for epoch {} ({} bytes, seed {})",
                epoch,
                dataset_bytes,
                hex::encode(seed_hash(epoch))
            );
            Self::load_or_build(epoch, dataset_bytes, &directory, &cancel)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dagpool_gen_{}_{}", label, uuid::Uuid::now_v7()))
    }

    #[test]
    fn test_size_rounds_up_to_words() {
        assert_eq!(KeccakDagGenerator::new(0).dataset_bytes(), 32);
        assert_eq!(KeccakDagGenerator::new(33).dataset_bytes(), 64);
        assert_eq!(KeccakDagGenerator::new(1024).dataset_bytes(), 1024);
    }

    #[test]
    fn test_file_name_uses_seed_prefix() {
        assert_eq!(
            KeccakDagGenerator::dataset_file_name(0),
            "full-R23-0000000000000000"
        );
        assert_eq!(
            KeccakDagGenerator::dataset_file_name(1),
            "full-R23-290decd9548b62a8"
        );
    }

    #[tokio::test]
    async fn test_generation_is_deterministic_per_epoch() {
        let generator = KeccakDagGenerator::new(256);
        let a = generator
            .generate(3, Path::new(""), CancellationToken::new())
            .await
            .unwrap();
        let b = generator
            .generate(3, Path::new(""), CancellationToken::new())
            .await
            .unwrap();
        let c = generator
            .generate(4, Path::new(""), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(a.len(), 256);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_canceled_generation_fails() {
        let generator = KeccakDagGenerator::new(4096);
        let token = CancellationToken::new();
        token.cancel();
        let result = generator.generate(1, Path::new(""), token).await;
        assert!(matches!(result, Err(DagError::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn test_dataset_is_memoized_on_disk() {
        let dir = temp_dir("memo");
        let generator = KeccakDagGenerator::new(128);

        let built = generator
            .generate(2, &dir, CancellationToken::new())
            .await
            .unwrap();
        let path = dir.join(KeccakDagGenerator::dataset_file_name(2));
        assert_eq!(fs::read(&path).unwrap(), built);

        // Overwrite with recognizable bytes of the right size: the next call
        // must load the file rather than rebuild.
        fs::write(&path, vec![7u8; 128]).unwrap();
        let loaded = generator
            .generate(2, &dir, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(loaded, vec![7u8; 128]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_wrong_sized_file_is_rebuilt() {
        let dir = temp_dir("resize");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(KeccakDagGenerator::dataset_file_name(5));
        fs::write(&path, vec![1u8; 10]).unwrap();

        let generator = KeccakDagGenerator::new(64);
        let built = generator
            .generate(5, &dir, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(built.len(), 64);
        assert_eq!(fs::read(&path).unwrap(), built);

        let _ = fs::remove_dir_all(&dir);
    }
}
