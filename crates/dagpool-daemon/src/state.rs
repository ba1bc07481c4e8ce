// crates/dagpool-daemon/src/state.rs
//
// Pool lifecycle state machine for the DAG pool daemon.
//
// Valid transitions:
//   Initializing -> Warming -> Ready
//   Any state -> ShuttingDown

use std::fmt;

/// Lifecycle states of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolState {
    /// Loading configuration and building the cache.
    Initializing,
    /// Generating (or loading) the DAG for the starting epoch.
    Warming,
    /// Serving datasets for new blocks.
    Ready,
    /// Releasing datasets and joining background generation.
    ShuttingDown,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Initializing => write!(f, "Initializing"),
            PoolState::Warming => write!(f, "Warming"),
            PoolState::Ready => write!(f, "Ready"),
            PoolState::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// State machine for managing daemon lifecycle transitions.
pub struct PoolStateMachine {
    pub current: PoolState,
}

impl PoolStateMachine {
    /// Create a new state machine starting in the Initializing state.
    pub fn new() -> Self {
        Self {
            current: PoolState::Initializing,
        }
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns an error if the transition is not valid.
    pub fn transition(&mut self, new_state: PoolState) -> Result<(), String> {
        let valid = match (&self.current, &new_state) {
            (_, PoolState::ShuttingDown) => true,
            (PoolState::Initializing, PoolState::Warming) => true,
            (PoolState::Warming, PoolState::Ready) => true,
            _ => false,
        };

        if !valid {
            return Err(format!(
                "Invalid state transition: {} -> {}",
                self.current, new_state
            ));
        }

        tracing::info!("State transition: {} -> {}", self.current, new_state);
        self.current = new_state;
        Ok(())
    }
}

impl Default for PoolStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
