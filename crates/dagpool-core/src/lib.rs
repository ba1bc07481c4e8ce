// crates/dagpool-core/src/lib.rs
//
// dagpool-core: Core types, traits, and epoch arithmetic for the DAG pool service.
//
// This is the leaf crate that the other crates in the workspace depend on.
// It defines the epoch/chain parameters, the Dataset handle shared between the
// cache and its callers, the protocol-wide error type, and the generator trait
// the cache consumes.

pub mod dataset;
pub mod epoch;
pub mod error;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use dagpool_core::Dataset;`

// Epoch types
pub use epoch::{seed_hash, Chain, ChainParams};

// Dataset types
pub use dataset::{Dataset, DatasetState, GenerationStatus};

// Error type
pub use error::DagError;

// Traits
pub use traits::DagGenerator;
