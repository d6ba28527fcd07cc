//! Task entity and the task-level state machine.

use armada_id::{JobId, TaskId};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Well-known reason codes recorded on task status transitions.
pub mod reasons {
    /// The task completed its work successfully.
    pub const NORMAL: &str = "normal";
    /// The task exited with a failure.
    pub const FAILED: &str = "failed";
    /// The task was killed on user or job-level request.
    pub const KILLED: &str = "killed";
    /// The task sat in one state longer than the configured timeout.
    pub const STUCK_IN_STATE: &str = "stuck_in_state";
    /// A started task exceeded the job's runtime limit.
    pub const RUNTIME_LIMIT_EXCEEDED: &str = "runtime_limit_exceeded";
    /// Placement could not be satisfied.
    pub const PLACEMENT_FAILED: &str = "placement_failed";
    /// A service job's desired capacity dropped below the task's index.
    pub const SCALED_DOWN: &str = "scaled_down";
}

/// Lifecycle state of a task.
///
/// States are ranked; a transition is legal only if the rank strictly
/// increases, so a task can skip forward (for example `Launched -> Started`
/// when intermediate observations were lost) but never move back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted by the reconciler; not yet handed to placement.
    Accepted,
    /// Placement accepted the task and picked an agent.
    Launched,
    /// The agent acknowledged the start request.
    StartInitiated,
    /// The workload is running.
    Started,
    /// Termination has been requested on the agent.
    KillInitiated,
    /// Terminal.
    Finished,
}

impl TaskState {
    /// All states, in rank order.
    pub const ALL: [TaskState; 6] = [
        TaskState::Accepted,
        TaskState::Launched,
        TaskState::StartInitiated,
        TaskState::Started,
        TaskState::KillInitiated,
        TaskState::Finished,
    ];

    /// Numeric rank used for monotonicity checks.
    pub fn rank(self) -> u8 {
        match self {
            TaskState::Accepted => 0,
            TaskState::Launched => 1,
            TaskState::StartInitiated => 2,
            TaskState::Started => 3,
            TaskState::KillInitiated => 4,
            TaskState::Finished => 5,
        }
    }

    /// Returns true if this state admits no successor.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished)
    }

    /// Returns true if moving from `self` to `next` is a legal forward step.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Accepted => "accepted",
            TaskState::Launched => "launched",
            TaskState::StartInitiated => "start_initiated",
            TaskState::Started => "started",
            TaskState::KillInitiated => "kill_initiated",
            TaskState::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// Task state plus reason and the time the state was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    /// Reason code for the last transition (see [`reasons`]).
    pub reason: Option<String>,
    /// Epoch milliseconds at which `state` was entered.
    pub timestamp_ms: i64,
}

/// A task: one unit of a job, pinned to an index within the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    /// Position within the job, unique among the job's live tasks.
    pub index: u32,
    /// How many predecessors at this index came before this task.
    pub resubmit_number: u32,
    pub status: TaskStatus,
}

impl Task {
    /// Creates the first task at `index` for a job.
    pub fn new(job_id: JobId, index: u32, now_ms: i64) -> Self {
        Self {
            id: TaskId::new(),
            job_id,
            index,
            resubmit_number: 0,
            status: TaskStatus {
                state: TaskState::Accepted,
                reason: None,
                timestamp_ms: now_ms,
            },
        }
    }

    /// Creates the replacement for this task at the same index: fresh id,
    /// incremented resubmit number, state reset to `Accepted`.
    pub fn resubmit(&self, now_ms: i64) -> Self {
        Self {
            id: TaskId::new(),
            job_id: self.job_id,
            index: self.index,
            resubmit_number: self.resubmit_number + 1,
            status: TaskStatus {
                state: TaskState::Accepted,
                reason: None,
                timestamp_ms: now_ms,
            },
        }
    }

    /// Returns a copy moved to `state`, or an error if the move is not a
    /// legal forward transition.
    pub fn with_state(
        &self,
        state: TaskState,
        reason: Option<String>,
        now_ms: i64,
    ) -> Result<Self, ModelError> {
        if !self.status.state.can_transition_to(state) {
            return Err(ModelError::InvalidStateTransition {
                entity: self.id.to_string(),
                from: self.status.state.to_string(),
                to: state.to_string(),
            });
        }
        let mut next = self.clone();
        next.status = TaskStatus {
            state,
            reason,
            timestamp_ms: now_ms,
        };
        Ok(next)
    }

    /// True once the task has reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.state.is_terminal()
    }

    /// True if the task finished and did not succeed.
    pub fn finished_with_failure(&self) -> bool {
        self.is_finished() && self.status.reason.as_deref() != Some(reasons::NORMAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn accepted_task() -> Task {
        Task::new(JobId::new(), 0, 1_000)
    }

    #[rstest]
    #[case(TaskState::Accepted, TaskState::Launched, true)]
    #[case(TaskState::Launched, TaskState::Started, true)]
    #[case(TaskState::Accepted, TaskState::Finished, true)]
    #[case(TaskState::Started, TaskState::KillInitiated, true)]
    #[case(TaskState::KillInitiated, TaskState::Finished, true)]
    #[case(TaskState::Started, TaskState::Launched, false)]
    #[case(TaskState::Finished, TaskState::Accepted, false)]
    #[case(TaskState::Finished, TaskState::KillInitiated, false)]
    #[case(TaskState::Started, TaskState::Started, false)]
    fn test_transition_table(
        #[case] from: TaskState,
        #[case] to: TaskState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_resubmit_is_fresh_task() {
        let task = accepted_task()
            .with_state(TaskState::Finished, Some(reasons::FAILED.into()), 2_000)
            .unwrap();
        let next = task.resubmit(3_000);
        assert_ne!(next.id, task.id);
        assert_eq!(next.job_id, task.job_id);
        assert_eq!(next.index, task.index);
        assert_eq!(next.resubmit_number, 1);
        assert_eq!(next.status.state, TaskState::Accepted);
        assert_eq!(next.status.timestamp_ms, 3_000);
    }

    #[test]
    fn test_finished_with_failure() {
        let ok = accepted_task()
            .with_state(TaskState::Finished, Some(reasons::NORMAL.into()), 2_000)
            .unwrap();
        assert!(!ok.finished_with_failure());

        let failed = accepted_task()
            .with_state(TaskState::Finished, Some(reasons::FAILED.into()), 2_000)
            .unwrap();
        assert!(failed.finished_with_failure());
    }

    proptest! {
        /// Any transition accepted by the checker strictly increases rank,
        /// and terminal states accept nothing.
        #[test]
        fn prop_transitions_monotonic(from_idx in 0usize..6, to_idx in 0usize..6) {
            let from = TaskState::ALL[from_idx];
            let to = TaskState::ALL[to_idx];
            if from.can_transition_to(to) {
                prop_assert!(to.rank() > from.rank());
                prop_assert!(!from.is_terminal());
            }
        }
    }
}
