//! Outbound processor manager
//!
//! Guards against overlapping signing attempts for the same outbound. An
//! attempt is started by taking a [`ProcessGuard`]; dropping the guard ends
//! it, so every exit path of the attempt (including a panic unwinding
//! through the task) releases the outbound id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Identifier of one outbound: `{chain}-{nonce}`.
pub fn out_tx_id(chain_id: i64, nonce: u64) -> String {
    format!("{}-{}", chain_id, nonce)
}

#[derive(Default)]
struct ManagerState {
    /// In-flight attempts and when they started
    active: HashMap<String, Instant>,
    /// Duration of the last finished attempt per id
    finished: HashMap<String, Duration>,
}

/// Tracks in-flight outbound attempts. Cloning shares the state.
#[derive(Clone, Default)]
pub struct OutTxProcessorManager {
    state: Arc<Mutex<ManagerState>>,
}

impl OutTxProcessorManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        // a panic while holding the lock leaves the maps consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts an attempt for `id`.
    ///
    /// # Returns
    ///
    /// * `Some(ProcessGuard)` - Attempt started; drop the guard to end it
    /// * `None` - An attempt for `id` is already in flight
    pub fn start_try_process(&self, id: &str) -> Option<ProcessGuard> {
        let mut state = self.lock();
        if state.active.contains_key(id) {
            debug!("outbound {} already in flight", id);
            return None;
        }
        state.active.insert(id.to_string(), Instant::now());
        info!("start process outbound {}", id);
        Some(ProcessGuard {
            manager: self.clone(),
            id: id.to_string(),
        })
    }

    /// Ends the attempt for `id` and records how long it took.
    pub fn end_try_process(&self, id: &str) {
        let mut state = self.lock();
        if let Some(started) = state.active.remove(id) {
            let elapsed = started.elapsed();
            info!("end process outbound {} after {:?}", id, elapsed);
            state.finished.insert(id.to_string(), elapsed);
        }
    }

    pub fn is_out_tx_active(&self, id: &str) -> bool {
        self.lock().active.contains_key(id)
    }

    /// Time spent so far by the in-flight attempt, or by the last finished one.
    pub fn time_in_try_process(&self, id: &str) -> Option<Duration> {
        let state = self.lock();
        state
            .active
            .get(id)
            .map(|started| started.elapsed())
            .or_else(|| state.finished.get(id).copied())
    }

    pub fn num_active(&self) -> usize {
        self.lock().active.len()
    }
}

/// Ends its attempt when dropped.
pub struct ProcessGuard {
    manager: OutTxProcessorManager,
    id: String,
}

impl ProcessGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.manager.end_try_process(&self.id);
    }
}
