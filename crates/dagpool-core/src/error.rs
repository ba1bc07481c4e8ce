use thiserror::Error;

/// Error types for dataset caching and generation.
///
/// `Clone` because a single failed generation is reported to every caller
/// waiting on the same dataset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    /// The cache was used before `configure` or after `shutdown`.
    #[error("DAG cache is not configured")]
    NotConfigured,

    /// The generation operation returned an error.
    #[error("DAG generation failed: {0}")]
    GenerationFailed(String),

    /// The caller's cancellation token fired while waiting for the given epoch.
    #[error("DAG generation for epoch {0} was canceled")]
    GenerationCanceled(u64),

    /// Rejected configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not allowed in the cache's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for DagError {
    fn from(e: std::io::Error) -> Self {
        DagError::GenerationFailed(e.to_string())
    }
}

impl From<tokio::task::JoinError> for DagError {
    fn from(e: tokio::task::JoinError) -> Self {
        DagError::GenerationFailed(format!("generation task aborted: {}", e))
    }
}
