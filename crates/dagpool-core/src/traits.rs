// crates/dagpool-core/src/traits.rs

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::DagError;

/// Trait for the dataset builder the cache drives.
///
/// Implemented by dagpool-cache (`KeccakDagGenerator`) and by test doubles.
/// Generation is long running and CPU/memory bound; implementations should
/// move the heavy work off the async executor and return promptly with an
/// error once `cancel` fires. A failed or canceled call must leave nothing
/// behind that would prevent a later retry for the same epoch.
#[async_trait]
pub trait DagGenerator: Send + Sync + 'static {
    /// Build the full dataset for `epoch`.
    ///
    /// `directory` is the opaque storage location configured on the cache.
    /// It may be empty, in which case nothing is persisted.
    async fn generate(
        &self,
        epoch: u64,
        directory: &Path,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, DagError>;
}
