// crates/dagpool-cache/src/lib.rs
//
// dagpool-cache: Dataset cache for the DAG pool service.
//
// Keeps a bounded, least-recently-used set of per-epoch DAGs, deduplicates
// concurrent generation of the same epoch, and pre-generates the next epoch
// in the background so the switch at an epoch boundary is cheap.

pub mod cache;
pub mod generation;
pub mod generator;

pub use cache::{CacheSnapshot, DagCache, DagCacheConfig, ResidentEntry, DEFAULT_CAPACITY};
pub use generator::KeccakDagGenerator;
