// crates/dagpool-core/src/dataset.rs
//
// Dataset: a per-epoch DAG buffer plus the single-flight state that lets any
// number of callers wait on one generation.
//
// Lifecycle:
//   Generating --> Ready    (payload written once, terminal)
//        |
//        v
//      Failed              (reported to waiters, then dropped by the cache)

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::DagError;

/// Coarse lifecycle state of a Dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    /// Generation has not finished; the payload is absent.
    Generating,
    /// Generation finished successfully; the payload is immutable from here on.
    Ready,
    /// Generation failed or was aborted; the dataset must not be served.
    Failed,
}

impl fmt::Display for DatasetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetState::Generating => write!(f, "Generating"),
            DatasetState::Ready => write!(f, "Ready"),
            DatasetState::Failed => write!(f, "Failed"),
        }
    }
}

/// Status broadcast to waiters. Carries the failure so every waiter sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationStatus {
    Generating,
    Ready,
    Failed(DagError),
}

impl GenerationStatus {
    fn state(&self) -> DatasetState {
        match self {
            GenerationStatus::Generating => DatasetState::Generating,
            GenerationStatus::Ready => DatasetState::Ready,
            GenerationStatus::Failed(_) => DatasetState::Failed,
        }
    }
}

/// The DAG for one epoch.
///
/// Shared as `Arc<Dataset>` between the cache topology and callers. The
/// payload is written exactly once, when generation succeeds, and is never
/// mutated afterwards. It is released when the last handle is dropped.
pub struct Dataset {
    epoch: u64,
    status: watch::Sender<GenerationStatus>,
    payload: OnceLock<Vec<u8>>,
    /// Set by whichever caller claims the generation run.
    started: AtomicBool,
    /// Aborts this dataset's generation only. Never a caller's token.
    cancel: CancellationToken,
}

impl Dataset {
    /// Create a dataset in the `Generating` state.
    ///
    /// `cancel` should be a child of the owning cache's shutdown token so the
    /// generation stops when the cache goes away.
    pub fn new(epoch: u64, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(GenerationStatus::Generating);
        Self {
            epoch,
            status,
            payload: OnceLock::new(),
            started: AtomicBool::new(false),
            cancel,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> DatasetState {
        self.status.borrow().state()
    }

    /// Current status, including the failure reason if generation failed.
    pub fn status(&self) -> GenerationStatus {
        self.status.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == DatasetState::Ready
    }

    pub fn is_failed(&self) -> bool {
        self.state() == DatasetState::Failed
    }

    /// The DAG bytes, present only once the dataset is `Ready`.
    pub fn payload(&self) -> Option<&[u8]> {
        if !self.is_ready() {
            return None;
        }
        self.payload.get().map(Vec::as_slice)
    }

    /// Size of the payload in bytes (0 unless ready).
    pub fn len(&self) -> usize {
        self.payload().map_or(0, <[u8]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the right to run generation for this dataset.
    ///
    /// Returns `true` for exactly one caller over the dataset's lifetime;
    /// everyone else must wait on [`Dataset::wait_ready`] instead.
    pub fn try_begin_generation(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether some caller has already claimed the generation run.
    pub fn generation_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Token the generation run must observe.
    pub fn generation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the generation run, if any. Waiters observe a failure.
    pub fn abort_generation(&self) {
        self.cancel.cancel();
    }

    /// Record the outcome of the generation run and wake all waiters.
    ///
    /// Only the first outcome is kept; later calls are ignored.
    pub fn complete(&self, outcome: Result<Vec<u8>, DagError>) {
        let next = match outcome {
            Ok(buffer) => {
                if self.payload.set(buffer).is_err() {
                    return;
                }
                GenerationStatus::Ready
            }
            Err(e) => GenerationStatus::Failed(e),
        };
        self.status.send_if_modified(|current| {
            if *current != GenerationStatus::Generating {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Wait until generation leaves the `Generating` state.
    ///
    /// Returns the generation failure to every waiter if it failed. If
    /// `cancel` fires first, only this waiter detaches with
    /// `GenerationCanceled`; the generation itself keeps running.
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), DagError> {
        let mut rx = self.status.subscribe();

        let finished = async {
            rx.wait_for(|s| *s != GenerationStatus::Generating)
                .await
                .map(|s| (*s).clone())
        };

        let status = tokio::select! {
            biased;
            status = finished => status.map_err(|_| {
                DagError::GenerationFailed(format!(
                    "status channel for epoch {} closed",
                    self.epoch
                ))
            })?,
            _ = cancel.cancelled() => return Err(DagError::GenerationCanceled(self.epoch)),
        };

        match status {
            GenerationStatus::Ready => Ok(()),
            GenerationStatus::Failed(e) => Err(e),
            GenerationStatus::Generating => Err(DagError::InvalidState(format!(
                "dataset for epoch {} woke while still generating",
                self.epoch
            ))),
        }
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("epoch", &self.epoch)
            .field("state", &self.state())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_new_dataset_is_generating() {
        let ds = Dataset::new(7, CancellationToken::new());
        assert_eq!(ds.epoch(), 7);
        assert_eq!(ds.state(), DatasetState::Generating);
        assert!(ds.payload().is_none());
        assert!(ds.is_empty());
    }

    #[test]
    fn test_only_one_caller_begins_generation() {
        let ds = Dataset::new(1, CancellationToken::new());
        assert!(!ds.generation_started());
        assert!(ds.try_begin_generation());
        assert!(!ds.try_begin_generation());
        assert!(ds.generation_started());
    }

    #[test]
    fn test_complete_keeps_first_outcome() {
        let ds = Dataset::new(2, CancellationToken::new());
        ds.complete(Ok(vec![1, 2, 3]));
        ds.complete(Err(DagError::GenerationFailed("late".into())));
        assert!(ds.is_ready());
        assert_eq!(ds.payload(), Some(&[1u8, 2, 3][..]));
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn test_failed_dataset_has_no_payload() {
        let ds = Dataset::new(3, CancellationToken::new());
        ds.complete(Err(DagError::GenerationFailed("boom".into())));
        assert!(ds.is_failed());
        assert!(ds.payload().is_none());
        assert_eq!(
            ds.status(),
            GenerationStatus::Failed(DagError::GenerationFailed("boom".into()))
        );
    }

    #[tokio::test]
    async fn test_waiters_all_see_ready() {
        let ds = Arc::new(Dataset::new(4, CancellationToken::new()));
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let ds = ds.clone();
            waiters.push(tokio::spawn(async move {
                ds.wait_ready(&CancellationToken::new()).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        ds.complete(Ok(vec![9; 16]));
        for w in waiters {
            assert!(w.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_waiters_all_see_failure() {
        let ds = Arc::new(Dataset::new(5, CancellationToken::new()));
        let a = {
            let ds = ds.clone();
            tokio::spawn(async move { ds.wait_ready(&CancellationToken::new()).await })
        };
        let b = {
            let ds = ds.clone();
            tokio::spawn(async move { ds.wait_ready(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ds.complete(Err(DagError::GenerationFailed("disk full".into())));
        let expected = Err(DagError::GenerationFailed("disk full".into()));
        assert_eq!(a.await.unwrap(), expected);
        assert_eq!(b.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_cancel_detaches_single_waiter() {
        let ds = Arc::new(Dataset::new(6, CancellationToken::new()));
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            ds.wait_ready(&token).await,
            Err(DagError::GenerationCanceled(6))
        );

        // The dataset itself is untouched and can still become ready.
        assert_eq!(ds.state(), DatasetState::Generating);
        ds.complete(Ok(vec![0; 4]));
        assert!(ds.wait_ready(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_ready_wins_over_fired_token() {
        let ds = Dataset::new(8, CancellationToken::new());
        ds.complete(Ok(vec![1]));
        let token = CancellationToken::new();
        token.cancel();
        assert!(ds.wait_ready(&token).await.is_ok());
    }

    #[test]
    fn test_abort_fires_generation_token() {
        let ds = Dataset::new(9, CancellationToken::new());
        let token = ds.generation_token();
        assert!(!token.is_cancelled());
        ds.abort_generation();
        assert!(token.is_cancelled());
    }
}
