// crates/dagpool-daemon/src/scheduler.rs
//
// Block scheduler for the DAG pool daemon.
//
// Simulates block progression at a fixed interval and, like a pool building
// a new job for every block, asks the DAG cache for the dataset matching the
// new height. Epoch boundaries are logged; the cache's own pre-generation
// hides most of the cost of crossing them.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dagpool_cache::DagCache;
use dagpool_core::{seed_hash, DagError};

/// Hex seed hash for `epoch`, computed off the async runtime.
///
/// The seed is a Keccak chain as long as the epoch number.
pub async fn seed_hex(epoch: u64) -> Result<String, DagError> {
    let seed = tokio::task::spawn_blocking(move || seed_hash(epoch)).await?;
    Ok(hex::encode(seed))
}

/// Scheduler that advances the chain height and requests DAGs per block.
pub struct BlockScheduler {
    cache: Arc<DagCache>,
    /// The current block height.
    current_block: u64,
    interval: Duration,
    shutdown: CancellationToken,
}

impl BlockScheduler {
    /// Create a scheduler starting at `start_block`.
    pub fn new(
        cache: Arc<DagCache>,
        start_block: u64,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cache,
            current_block: start_block,
            interval,
            shutdown,
        }
    }

    pub fn current_block(&self) -> u64 {
        self.current_block
    }

    /// Run the scheduler loop until the shutdown token fires.
    pub async fn run(&mut self) -> Result<(), DagError> {
        tracing::info!(
            "Block scheduler started at block {} (epoch_length={}, interval={:?})",
            self.current_block,
            self.cache.chain().epoch_length(),
            self.interval
        );

        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Block scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.advance_block().await {
                        Ok(()) => {}
                        Err(DagError::GenerationCanceled(_)) => break,
                        Err(DagError::NotConfigured) => return Err(DagError::NotConfigured),
                        Err(e) => tracing::warn!(
                            "No DAG for block {}: {}",
                            self.current_block,
                            e
                        ),
                    }
                }
            }
        }

        Ok(())
    }

    /// Advance by one block and fetch the dataset for the new height.
    pub async fn advance_block(&mut self) -> Result<(), DagError> {
        self.current_block += 1;
        let chain = *self.cache.chain();
        let epoch = chain.epoch_for_height(self.current_block);

        if self.current_block == chain.first_block_of_epoch(epoch) {
            let seed = seed_hex(epoch).await?;
            tracing::info!(
                "=== EPOCH {} BOUNDARY === (block {}, seed {})",
                epoch,
                self.current_block,
                seed
            );
        } else {
            tracing::trace!("Block {} (epoch {})", self.current_block, epoch);
        }

        let dataset = self
            .cache
            .get_dataset(self.current_block, &self.shutdown)
            .await?;
        tracing::debug!(
            "Block {} served with DAG epoch {} ({} bytes)",
            self.current_block,
            dataset.epoch(),
            dataset.len()
        );
        Ok(())
    }
}
