//! Resolver configuration knobs.

use std::collections::BTreeMap;

use armada_model::TaskState;

/// Recognized resolver options.
///
/// The per-state timeout map drives the stuck-state pass: a running task
/// whose current-state duration exceeds the configured threshold gets a
/// forced kill. States without an entry never time out.
#[derive(Debug, Clone)]
pub struct ReconcilerConfiguration {
    /// Token bucket capacity for new-task creation.
    pub new_task_bucket_capacity: u64,
    /// Fixed refill cadence of the new-task bucket.
    pub new_task_refill_interval_ms: i64,
    /// Tokens added per refill interval.
    pub new_task_refill_amount: u64,
    /// First retry delay after a failed store write.
    pub store_write_retry_initial_delay_ms: i64,
    /// Upper bound on the store-write backoff delay.
    pub store_write_retry_max_delay_ms: i64,
    /// Per-state stuck timeout thresholds.
    pub task_state_timeouts_ms: BTreeMap<TaskState, i64>,
}

impl ReconcilerConfiguration {
    /// Stuck threshold for `state`, if one is configured.
    pub fn timeout_for(&self, state: TaskState) -> Option<i64> {
        self.task_state_timeouts_ms.get(&state).copied()
    }
}

impl Default for ReconcilerConfiguration {
    fn default() -> Self {
        let mut task_state_timeouts_ms = BTreeMap::new();
        task_state_timeouts_ms.insert(TaskState::Launched, 600_000);
        task_state_timeouts_ms.insert(TaskState::StartInitiated, 600_000);
        task_state_timeouts_ms.insert(TaskState::KillInitiated, 30_000);

        Self {
            new_task_bucket_capacity: 10,
            new_task_refill_interval_ms: 100,
            new_task_refill_amount: 1,
            store_write_retry_initial_delay_ms: 5_000,
            store_write_retry_max_delay_ms: 5_000,
            task_state_timeouts_ms,
        }
    }
}
