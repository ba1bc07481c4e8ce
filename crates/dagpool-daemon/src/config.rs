// crates/dagpool-daemon/src/config.rs
//
// Runtime configuration for the DAG pool daemon.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;

use dagpool_core::{Chain, ChainParams, DagError};

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Chain family: "ethereum", "ethereumclassic" (or "etc"), "ubiq".
    #[serde(default = "default_chain")]
    pub chain: Chain,

    /// Overrides the chain's blocks-per-epoch when set.
    #[serde(default)]
    pub epoch_length: Option<u64>,

    /// Directory where generated DAGs are memoized. Empty disables it.
    #[serde(default = "default_dag_dir")]
    pub dag_dir: String,

    /// Number of resident DAGs to keep. 0 selects the cache default.
    #[serde(default)]
    pub dag_cache_capacity: usize,

    /// Size of each generated dataset in bytes.
    #[serde(default = "default_dataset_bytes")]
    pub dataset_bytes: usize,

    /// Block height the simulated chain starts at.
    #[serde(default)]
    pub start_height: u64,

    /// Seconds between simulated blocks.
    #[serde(default = "default_block_interval_secs")]
    pub block_interval_secs: u64,

    /// Log level: "trace", "debug", "info", "warn", "error".
    /// RUST_LOG takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_chain() -> Chain {
    Chain::Ethereum
}

fn default_dag_dir() -> String {
    "~/.dagpool/dag".to_string()
}

fn default_dataset_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_block_interval_secs() -> u64 {
    13
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            epoch_length: None,
            dag_dir: default_dag_dir(),
            dag_cache_capacity: 0,
            dataset_bytes: default_dataset_bytes(),
            start_height: 0,
            block_interval_secs: default_block_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Chain parameters, honoring an `epoch_length` override.
    pub fn chain_params(&self) -> Result<ChainParams, DagError> {
        match self.epoch_length {
            Some(len) => ChainParams::custom(len),
            None => Ok(self.chain.params()),
        }
    }
}
