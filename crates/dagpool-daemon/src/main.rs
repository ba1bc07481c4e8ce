// crates/dagpool-daemon/src/main.rs
//
// Binary entrypoint for the DAG pool daemon.
//
// Loads configuration, initializes tracing, builds and configures the DAG
// cache, warms the dataset for the starting epoch, then runs the block
// scheduler until Ctrl-C. On shutdown the cache releases every dataset and
// joins its background generation.

mod config;
mod scheduler;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use config::DaemonConfig;
use dagpool_cache::{DagCache, DagCacheConfig, KeccakDagGenerator};
use scheduler::{seed_hex, BlockScheduler};
use state::{PoolState, PoolStateMachine};

/// DAG pool daemon: keeps per-epoch DAGs warm for share verification.
#[derive(Parser, Debug)]
#[command(name = "dagpool-daemon", version = "0.1.0", about = "Pool-side DAG cache daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.dagpool/config.toml")]
    config: String,

    /// Overrides `dag_dir` from the configuration file.
    #[arg(long)]
    dag_dir: Option<String>,

    /// Overrides `start_height` from the configuration file.
    #[arg(long)]
    start_height: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Configuration is read before tracing so the file's log level applies.
    let config_path = expand_tilde(&args.config);
    let loaded = DaemonConfig::load(&config_path);
    let mut daemon_config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => DaemonConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&daemon_config.log_level)),
        )
        .init();

    match &loaded {
        Ok(_) => tracing::info!("Loaded configuration from {}", config_path),
        Err(e) => tracing::warn!(
            "Could not load config from {}: {}. Using defaults.",
            config_path,
            e
        ),
    }

    // CLI flags override the config file values.
    if let Some(dag_dir) = args.dag_dir {
        daemon_config.dag_dir = dag_dir;
    }
    if let Some(start_height) = args.start_height {
        daemon_config.start_height = start_height;
    }

    let chain = daemon_config.chain_params()?;
    let dag_dir = PathBuf::from(expand_tilde(&daemon_config.dag_dir));

    tracing::info!("DAG pool daemon v0.1.0");
    tracing::info!(
        "Chain: {:?} (epoch_length={})",
        daemon_config.chain,
        chain.epoch_length()
    );
    tracing::info!("DAG directory: {}", dag_dir.display());
    tracing::info!("Dataset size: {} bytes", daemon_config.dataset_bytes);

    let mut state_machine = PoolStateMachine::new();

    let generator = Arc::new(KeccakDagGenerator::new(daemon_config.dataset_bytes));
    let cache = Arc::new(DagCache::new(generator, chain));
    cache.configure(DagCacheConfig {
        capacity: daemon_config.dag_cache_capacity,
        directory: dag_dir,
    })?;

    // Ctrl-C cancels everything waiting on the shutdown token.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    state_machine.transition(PoolState::Warming)?;
    let start_height = daemon_config.start_height;
    let start_epoch = chain.epoch_for_height(start_height);
    let seed = seed_hex(start_epoch).await?;
    tracing::info!(
        "Warming DAG for epoch {} (block {}, seed {})",
        start_epoch,
        start_height,
        seed
    );

    match cache.get_dataset(start_height, &shutdown).await {
        Ok(dataset) => {
            tracing::info!(
                "DAG for epoch {} ready ({} bytes)",
                dataset.epoch(),
                dataset.len()
            );
            state_machine.transition(PoolState::Ready)?;

            let mut scheduler = BlockScheduler::new(
                cache.clone(),
                start_height,
                Duration::from_secs(daemon_config.block_interval_secs.max(1)),
                shutdown.clone(),
            );
            if let Err(e) = scheduler.run().await {
                tracing::error!("Block scheduler error: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("Failed to warm DAG for epoch {}: {}", start_epoch, e);
        }
    }

    let _ = state_machine.transition(PoolState::ShuttingDown);
    shutdown.cancel();
    cache.shutdown().await;
    tracing::info!("DAG pool daemon shut down gracefully");

    Ok(())
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}
