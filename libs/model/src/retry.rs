//! Retry policy for failed tasks.

use serde::{Deserialize, Serialize};

use crate::{Job, Task};

/// How a job responds when one of its tasks finishes non-successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Never resubmit a failed task.
    Never,
    /// Resubmit immediately, up to `retries` times per index.
    Immediate { retries: u32 },
    /// Resubmit after a fixed delay, up to `retries` times per index.
    Delayed { delay_ms: i64, retries: u32 },
    /// Resubmit with exponentially growing delay, up to `retries` times.
    ExponentialBackoff {
        initial_delay_ms: i64,
        max_delay_ms: i64,
        retries: u32,
    },
}

impl RetryPolicy {
    /// Total resubmits allowed per task index.
    pub fn retries(&self) -> u32 {
        match *self {
            RetryPolicy::Never => 0,
            RetryPolicy::Immediate { retries }
            | RetryPolicy::Delayed { retries, .. }
            | RetryPolicy::ExponentialBackoff { retries, .. } => retries,
        }
    }

    /// Delay before attempt number `failures_so_far + 1`, in milliseconds.
    pub fn delay_ms(&self, failures_so_far: u32) -> i64 {
        match *self {
            RetryPolicy::Never | RetryPolicy::Immediate { .. } => 0,
            RetryPolicy::Delayed { delay_ms, .. } => delay_ms,
            RetryPolicy::ExponentialBackoff {
                initial_delay_ms,
                max_delay_ms,
                ..
            } => {
                let shift = failures_so_far.min(32);
                initial_delay_ms
                    .saturating_mul(1i64 << shift)
                    .min(max_delay_ms)
            }
        }
    }
}

/// Decides whether a failed task should be resubmitted at its index.
///
/// A task is retry-eligible when it finished non-successfully and its
/// resubmit count has not yet exhausted the job's retry budget.
pub fn should_retry(job: &Job, task: &Task) -> bool {
    if !task.finished_with_failure() {
        return false;
    }
    task.resubmit_number < job.descriptor.retry_policy.retries()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reasons, JobDescriptor, TaskState};
    use armada_id::JobId;

    #[test]
    fn test_retry_budget() {
        assert_eq!(RetryPolicy::Never.retries(), 0);
        assert_eq!(RetryPolicy::Immediate { retries: 3 }.retries(), 3);
    }

    #[test]
    fn test_exponential_delay_caps_at_max() {
        let policy = RetryPolicy::ExponentialBackoff {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            retries: 10,
        };
        assert_eq!(policy.delay_ms(0), 100);
        assert_eq!(policy.delay_ms(1), 200);
        assert_eq!(policy.delay_ms(2), 400);
        assert_eq!(policy.delay_ms(5), 1_000);
        assert_eq!(policy.delay_ms(31), 1_000);
    }

    #[test]
    fn test_should_retry_only_failed_within_budget() {
        let job = Job::new(
            JobDescriptor::batch("render", 1, RetryPolicy::Immediate { retries: 1 }),
            0,
        );
        let task = Task::new(job.id, 0, 0);

        // Still running: no retry.
        assert!(!should_retry(&job, &task));

        let failed = task
            .with_state(TaskState::Finished, Some(reasons::FAILED.into()), 10)
            .unwrap();
        assert!(should_retry(&job, &failed));

        // Second generation exhausts the budget.
        let second = failed.resubmit(20);
        let second_failed = second
            .with_state(TaskState::Finished, Some(reasons::FAILED.into()), 30)
            .unwrap();
        assert!(!should_retry(&job, &second_failed));

        // Success never retries.
        let ok = task
            .with_state(TaskState::Finished, Some(reasons::NORMAL.into()), 10)
            .unwrap();
        assert!(!should_retry(&job, &ok));
    }
}
