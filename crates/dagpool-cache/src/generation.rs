// crates/dagpool-cache/src/generation.rs
//
// Single-flight generation driver.
//
// The cache's lock only guards topology. The generation itself runs here, in
// a task owned by the cache's TaskTracker, so it outlives whichever caller
// started it and is joined on shutdown. Each Dataset admits one run; every
// other caller waits on the Dataset's status instead.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::task::TaskTracker;

use dagpool_core::{DagError, DagGenerator, Dataset};

/// Spawns and tracks generation runs for datasets.
pub struct GenerationDriver {
    generator: Arc<dyn DagGenerator>,
    tracker: TaskTracker,
}

impl GenerationDriver {
    pub fn new(generator: Arc<dyn DagGenerator>) -> Self {
        Self {
            generator,
            tracker: TaskTracker::new(),
        }
    }

    /// Start generation for `dataset` unless a run was already claimed.
    ///
    /// Returns `true` if this call started the run. Never blocks: the run is
    /// detached from the caller and reports through the dataset's status.
    /// `on_failure` runs before waiters are woken with a failure, so the
    /// owner can drop the dataset first.
    pub fn ensure_started<F>(
        &self,
        dataset: &Arc<Dataset>,
        directory: &Path,
        on_failure: F,
    ) -> bool
    where
        F: FnOnce(&Arc<Dataset>, &DagError) + Send + 'static,
    {
        if !dataset.try_begin_generation() {
            return false;
        }

        let dataset = dataset.clone();
        let generator = self.generator.clone();
        let directory = directory.to_path_buf();

        self.tracker.spawn(async move {
            let epoch = dataset.epoch();
            let token = dataset.generation_token();
            let started = Instant::now();

            // The generator runs in its own task so a panic inside it turns
            // into a failure for the waiters instead of a silent hang.
            let mut run = {
                let token = token.clone();
                tokio::spawn(async move { generator.generate(epoch, &directory, token).await })
            };

            let outcome = tokio::select! {
                joined = &mut run => joined.map_err(DagError::from).and_then(|r| r),
                _ = token.cancelled() => {
                    run.abort();
                    Err(DagError::GenerationFailed(format!(
                        "generation for epoch {} was aborted",
                        epoch
                    )))
                }
            };

            match &outcome {
                Ok(buffer) => tracing::info!(
                    "Generated DAG for epoch {} ({} bytes) in {:.1?}",
                    epoch,
                    buffer.len(),
                    started.elapsed()
                ),
                Err(e) => {
                    tracing::warn!("DAG generation for epoch {} failed: {}", epoch, e);
                    on_failure(&dataset, e);
                }
            }

            dataset.complete(outcome);
        });

        true
    }

    /// Allow new runs again after a previous `close_and_wait`.
    pub fn reopen(&self) {
        self.tracker.reopen();
    }

    /// Number of generation runs still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every tracked run to finish.
    pub async fn close_and_wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
