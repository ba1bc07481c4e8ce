// crates/dagpool-cache/src/cache.rs
//
// DagCache: bounded LRU cache of per-epoch DAGs with next-epoch pre-generation.
//
// Topology (resident map, staged slot, capacity, access stamps) lives behind
// one short-held mutex. Generation never runs under that mutex: a miss
// inserts a provisional `Generating` dataset, releases the lock, and then
// starts or joins the dataset's single generation run.
//
// Ownership: a dataset is held by the resident map or by the staged slot,
// never by both. Adoption moves it from one to the other. A failed run is
// removed from either place before its waiters are woken.

use std::collections::HashMap;
use std::path::PathBuf;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use dagpool_core::{ChainParams, DagError, DagGenerator, Dataset, DatasetState};

use crate::generation::GenerationDriver;

/// Capacity used when the cache is configured with 0.
pub const DEFAULT_CAPACITY: usize = 3;

/// Settings supplied to [`DagCache::configure`].
#[derive(Debug, Clone, Default)]
pub struct DagCacheConfig {
    /// Maximum number of resident datasets. 0 means [`DEFAULT_CAPACITY`],
    /// resolved on the first lookup.
    pub capacity: usize,
    /// Storage location handed to the generator untouched.
    pub directory: PathBuf,
}

/// A resident dataset and its recency bookkeeping.
struct Resident {
    dataset: Arc<Dataset>,
    last_used: Instant,
    /// Logical access stamp, strictly increasing across the whole cache.
    access: u64,
}

/// Everything guarded by the cache mutex. `None` in the cache means
/// unconfigured or shut down.
struct Topology {
    configured_capacity: usize,
    capacity: Option<usize>,
    directory: PathBuf,
    resident: HashMap<u64, Resident>,
    staged: Option<Arc<Dataset>>,
    access_clock: u64,
    /// Parent of every dataset's generation token.
    shutdown: CancellationToken,
}

impl Topology {
    fn new(config: DagCacheConfig) -> Self {
        Self {
            configured_capacity: config.capacity,
            capacity: None,
            directory: config.directory,
            resident: HashMap::new(),
            staged: None,
            access_clock: 0,
            shutdown: CancellationToken::new(),
        }
    }

    fn is_pristine(&self) -> bool {
        self.resident.is_empty() && self.staged.is_none()
    }

    fn resolve_capacity(&mut self) -> usize {
        if let Some(capacity) = self.capacity {
            return capacity;
        }
        let capacity = if self.configured_capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            self.configured_capacity
        };
        tracing::debug!("DAG cache capacity resolved to {}", capacity);
        self.capacity = Some(capacity);
        capacity
    }

    fn next_access(&mut self) -> u64 {
        self.access_clock += 1;
        self.access_clock
    }

    /// Record a use of a resident epoch and return its dataset.
    ///
    /// A failed entry counts as a miss and is removed.
    fn touch(&mut self, epoch: u64) -> Option<Arc<Dataset>> {
        if self
            .resident
            .get(&epoch)
            .is_some_and(|entry| entry.dataset.is_failed())
        {
            self.resident.remove(&epoch);
            tracing::debug!("Resident DAG for epoch {} had failed, regenerating", epoch);
            return None;
        }

        let access = self.next_access();
        let entry = self.resident.get_mut(&epoch)?;
        entry.last_used = Instant::now();
        entry.access = access;
        Some(entry.dataset.clone())
    }

    fn new_dataset(&self, epoch: u64) -> Arc<Dataset> {
        Arc::new(Dataset::new(epoch, self.shutdown.child_token()))
    }

    /// After a hit on `epoch`, stage `epoch + 1` if nothing useful is staged.
    ///
    /// Returns the newly staged dataset so the caller can start it once the
    /// lock is released.
    fn stage_after_hit(&mut self, epoch: u64) -> Option<Arc<Dataset>> {
        let next = epoch.checked_add(1)?;
        if self.resident.contains_key(&next) {
            return None;
        }

        let replace = match &self.staged {
            None => true,
            Some(staged) => staged.epoch() <= epoch || staged.is_failed(),
        };
        if !replace {
            return None;
        }

        if let Some(old) = self.staged.take() {
            tracing::debug!(
                "Discarding pre-generated DAG for epoch {} ({})",
                old.epoch(),
                old.state()
            );
            old.abort_generation();
        }

        tracing::info!("Pre-generating DAG for epoch {}", next);
        let dataset = self.new_dataset(next);
        self.staged = Some(dataset.clone());
        Some(dataset)
    }

    /// Remove least-recently-used datasets until one more fits.
    ///
    /// Victim is the smallest access stamp; stamps never repeat, and equal
    /// keys would fall back to the lowest epoch.
    fn evict_for(&mut self, incoming: u64, capacity: usize) {
        while self.resident.len() >= capacity {
            let victim = self
                .resident
                .iter()
                .min_by_key(|(epoch, entry)| (entry.access, **epoch))
                .map(|(epoch, _)| *epoch);

            let Some(victim) = victim else {
                break;
            };

            if let Some(entry) = self.resident.remove(&victim) {
                tracing::info!(
                    "Evicting DAG for epoch {} in favour of epoch {}",
                    victim,
                    incoming
                );
                tracing::debug!(
                    "Evicted DAG epoch {} was {} (idle {:.1?})",
                    victim,
                    entry.dataset.state(),
                    entry.last_used.elapsed()
                );
            }
        }
    }

    /// Take the staged dataset for `epoch` if usable, else create a fresh one.
    /// The result is inserted into the resident map.
    fn adopt_or_create(&mut self, epoch: u64) -> Arc<Dataset> {
        let staged = match self.staged.take() {
            Some(staged) if staged.epoch() == epoch => Some(staged),
            other => {
                self.staged = other;
                None
            }
        };

        let dataset = match staged {
            Some(staged) if !staged.is_failed() => {
                tracing::info!("Using pre-generated DAG for epoch {}", epoch);
                staged
            }
            Some(_) => {
                tracing::info!(
                    "Pre-generated DAG for epoch {} failed, creating new",
                    epoch
                );
                self.new_dataset(epoch)
            }
            None => {
                tracing::info!(
                    "No pre-generated DAG available, creating new for epoch {}",
                    epoch
                );
                self.new_dataset(epoch)
            }
        };

        let access = self.next_access();
        self.resident.insert(
            epoch,
            Resident {
                dataset: dataset.clone(),
                last_used: Instant::now(),
                access,
            },
        );
        dataset
    }

    /// Drop `dataset` from wherever it still lives. Other datasets for the
    /// same epoch are left alone.
    fn discard(&mut self, dataset: &Arc<Dataset>) -> bool {
        let epoch = dataset.epoch();
        let mut removed = false;

        if self
            .resident
            .get(&epoch)
            .is_some_and(|entry| Arc::ptr_eq(&entry.dataset, dataset))
        {
            self.resident.remove(&epoch);
            removed = true;
        }
        if self
            .staged
            .as_ref()
            .is_some_and(|staged| Arc::ptr_eq(staged, dataset))
        {
            self.staged = None;
            removed = true;
        }
        removed
    }
}

/// Read-only view of one resident dataset.
#[derive(Debug, Clone)]
pub struct ResidentEntry {
    pub epoch: u64,
    pub state: DatasetState,
    pub last_used: Instant,
}

/// Point-in-time view of the cache topology.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    /// Resolved capacity, `None` until the first lookup.
    pub capacity: Option<usize>,
    pub directory: PathBuf,
    /// Resident datasets ordered by epoch.
    pub resident: Vec<ResidentEntry>,
    /// Epoch and state of the staged dataset, if any.
    pub staged: Option<(u64, DatasetState)>,
}

impl CacheSnapshot {
    pub fn resident_epochs(&self) -> Vec<u64> {
        self.resident.iter().map(|entry| entry.epoch).collect()
    }

    pub fn staged_epoch(&self) -> Option<u64> {
        self.staged.map(|(epoch, _)| epoch)
    }

    pub fn last_used(&self, epoch: u64) -> Option<Instant> {
        self.resident
            .iter()
            .find(|entry| entry.epoch == epoch)
            .map(|entry| entry.last_used)
    }
}

/// Process-wide DAG cache.
///
/// Construct once, `configure` once, share by `Arc` with every caller, and
/// `shutdown` when the service stops.
pub struct DagCache {
    chain: ChainParams,
    driver: GenerationDriver,
    topology: Arc<Mutex<Option<Topology>>>,
}

impl DagCache {
    /// Create an unconfigured cache. Lookups fail with `NotConfigured` until
    /// [`DagCache::configure`] is called.
    pub fn new(generator: Arc<dyn DagGenerator>, chain: ChainParams) -> Self {
        Self {
            chain,
            driver: GenerationDriver::new(generator),
            topology: Arc::new(Mutex::new(None)),
        }
    }

    /// Create and configure in one step.
    pub fn with_config(
        generator: Arc<dyn DagGenerator>,
        chain: ChainParams,
        config: DagCacheConfig,
    ) -> Result<Self, DagError> {
        let cache = Self::new(generator, chain);
        cache.configure(config)?;
        Ok(cache)
    }

    pub fn chain(&self) -> &ChainParams {
        &self.chain
    }

    /// Install capacity and directory. No generation happens here.
    ///
    /// May be repeated until the first dataset is created; after that it
    /// fails with `InvalidState`. A shut-down cache can be configured again.
    pub fn configure(&self, config: DagCacheConfig) -> Result<(), DagError> {
        let mut guard = self.topology.lock();
        if let Some(topology) = guard.as_ref() {
            if !topology.is_pristine() {
                return Err(DagError::InvalidState(
                    "DAG cache is already in use".to_string(),
                ));
            }
        }

        tracing::info!(
            "DAG cache configured (capacity={}, directory={})",
            config.capacity,
            config.directory.display()
        );
        self.driver.reopen();
        *guard = Some(Topology::new(config));
        Ok(())
    }

    /// Return the ready dataset for the epoch containing `block_height`,
    /// generating it first if needed.
    ///
    /// A hit may also schedule background generation of the next epoch. If
    /// `cancel` fires while waiting, this caller gets `GenerationCanceled`
    /// and the shared generation keeps running for everyone else. A failed
    /// generation is reported to every waiter and removed from the cache so
    /// the next call retries.
    pub async fn get_dataset(
        &self,
        block_height: u64,
        cancel: &CancellationToken,
    ) -> Result<Arc<Dataset>, DagError> {
        let epoch = self.chain.epoch_for_height(block_height);

        let (dataset, staged, directory) = {
            let mut guard = self.topology.lock();
            let topology = guard.as_mut().ok_or(DagError::NotConfigured)?;
            let capacity = topology.resolve_capacity();

            match topology.touch(epoch) {
                Some(dataset) => {
                    let staged = topology.stage_after_hit(epoch);
                    (dataset, staged, topology.directory.clone())
                }
                None => {
                    topology.evict_for(epoch, capacity);
                    let dataset = topology.adopt_or_create(epoch);
                    (dataset, None, topology.directory.clone())
                }
            }
        };

        if let Some(next) = staged {
            self.start(&next, &directory);
        }
        self.start(&dataset, &directory);

        if let Err(e) = dataset.wait_ready(cancel).await {
            if let DagError::GenerationCanceled(_) = e {
                tracing::debug!("Caller stopped waiting for DAG epoch {}", epoch);
            }
            return Err(e);
        }
        Ok(dataset)
    }

    /// Start generation for `dataset` if nobody has yet. A failed run
    /// removes the dataset from the topology whether or not anyone is still
    /// waiting on it.
    fn start(&self, dataset: &Arc<Dataset>, directory: &Path) {
        let topology = Arc::downgrade(&self.topology);
        self.driver
            .ensure_started(dataset, directory, move |failed, e| {
                let Some(topology) = topology.upgrade() else {
                    return;
                };
                if let Some(topology) = topology.lock().as_mut() {
                    if topology.discard(failed) {
                        tracing::warn!(
                            "Dropped failed DAG for epoch {}: {}",
                            failed.epoch(),
                            e
                        );
                    }
                };
            });
    }

    /// Current topology, for diagnostics. Failed datasets never appear.
    pub fn snapshot(&self) -> Result<CacheSnapshot, DagError> {
        let guard = self.topology.lock();
        let topology = guard.as_ref().ok_or(DagError::NotConfigured)?;

        let mut resident: Vec<ResidentEntry> = topology
            .resident
            .iter()
            .filter(|(_, entry)| !entry.dataset.is_failed())
            .map(|(epoch, entry)| ResidentEntry {
                epoch: *epoch,
                state: entry.dataset.state(),
                last_used: entry.last_used,
            })
            .collect();
        resident.sort_by_key(|entry| entry.epoch);

        Ok(CacheSnapshot {
            capacity: topology.capacity,
            directory: topology.directory.clone(),
            resident,
            staged: topology
                .staged
                .as_ref()
                .filter(|staged| !staged.is_failed())
                .map(|staged| (staged.epoch(), staged.state())),
        })
    }

    /// Release every resident and staged dataset and join all in-flight
    /// generation. Later lookups fail with `NotConfigured`.
    pub async fn shutdown(&self) {
        let topology = self.topology.lock().take();
        let Some(topology) = topology else {
            return;
        };

        topology.shutdown.cancel();
        let resident = topology.resident.len();
        let staged = topology.staged.is_some();
        drop(topology);

        tracing::info!(
            "DAG cache shutting down: released {} resident and {} staged datasets, joining {} generation tasks",
            resident,
            usize::from(staged),
            self.driver.in_flight()
        );
        self.driver.close_and_wait().await;
        tracing::info!("DAG cache shut down");
    }
}

impl Drop for DagCache {
    fn drop(&mut self) {
        if let Some(topology) = self.topology.lock().as_ref() {
            topology.shutdown.cancel();
        }
    }
}
