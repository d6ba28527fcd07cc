//! Job entity, descriptor, and job-level state machine.

use armada_id::JobId;
use serde::{Deserialize, Serialize};

use crate::{ModelError, RetryPolicy};

/// Lifecycle state of a job.
///
/// Transitions are monotonic: `Accepted -> KillInitiated -> Finished`, with
/// `Accepted -> Finished` permitted for jobs that complete naturally.
/// `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// The job has been accepted by the API and is being driven to run.
    Accepted,
    /// Termination has been requested; tasks are being killed.
    KillInitiated,
    /// Terminal. No task creation may follow.
    Finished,
}

impl JobState {
    /// Numeric rank used for monotonicity checks.
    fn rank(self) -> u8 {
        match self {
            JobState::Accepted => 0,
            JobState::KillInitiated => 1,
            JobState::Finished => 2,
        }
    }

    /// Returns true if this state admits no successor.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished)
    }

    /// Returns true if moving from `self` to `next` is a legal forward step.
    pub fn can_transition_to(self, next: JobState) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Accepted => "accepted",
            JobState::KillInitiated => "kill_initiated",
            JobState::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// Job state plus the time the state was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    /// Machine-readable reason for the last transition, if any.
    pub reason: Option<String>,
    /// Epoch milliseconds at which `state` was entered.
    pub timestamp_ms: i64,
}

/// Desired instance counts for a service job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCapacity {
    pub min: u32,
    pub desired: u32,
    pub max: u32,
}

impl ServiceCapacity {
    /// Builds a capacity, rejecting anything that violates `min <= desired <= max`.
    pub fn new(min: u32, desired: u32, max: u32) -> Result<Self, ModelError> {
        if min > desired || desired > max {
            return Err(ModelError::InvalidCapacity { min, desired, max });
        }
        Ok(Self { min, desired, max })
    }
}

/// Type-specific job extension: fixed-size batch or capacity-sized service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobExt {
    Batch { size: u32 },
    Service { capacity: ServiceCapacity },
}

/// Desired specification of a job, as submitted through the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Owning application name, used for capacity group lookup.
    pub application: String,
    /// Capacity group this job draws quota from.
    pub capacity_group: String,
    /// Policy applied when a task finishes non-successfully.
    pub retry_policy: RetryPolicy,
    /// Wall-clock budget for a started task, if bounded.
    pub runtime_limit_ms: Option<i64>,
    /// Batch or service sizing.
    pub ext: JobExt,
}

impl JobDescriptor {
    /// Convenience constructor for a batch descriptor.
    pub fn batch(application: impl Into<String>, size: u32, retry_policy: RetryPolicy) -> Self {
        Self {
            application: application.into(),
            capacity_group: crate::DEFAULT_CAPACITY_GROUP.to_string(),
            retry_policy,
            runtime_limit_ms: None,
            ext: JobExt::Batch { size },
        }
    }

    /// Convenience constructor for a service descriptor.
    pub fn service(
        application: impl Into<String>,
        capacity: ServiceCapacity,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            application: application.into(),
            capacity_group: crate::DEFAULT_CAPACITY_GROUP.to_string(),
            retry_policy,
            runtime_limit_ms: None,
            ext: JobExt::Service { capacity },
        }
    }
}

/// A job: identity, desired spec, and current lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub descriptor: JobDescriptor,
    pub status: JobStatus,
}

impl Job {
    /// Creates a freshly accepted job.
    pub fn new(descriptor: JobDescriptor, now_ms: i64) -> Self {
        Self {
            id: JobId::new(),
            descriptor,
            status: JobStatus {
                state: JobState::Accepted,
                reason: None,
                timestamp_ms: now_ms,
            },
        }
    }

    /// Returns a copy moved to `state`, or an error if the move is not a
    /// legal forward transition.
    pub fn with_state(
        &self,
        state: JobState,
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
        next.status = JobStatus {
            state,
            reason,
            timestamp_ms: now_ms,
        };
        Ok(next)
    }

    /// True once the job has reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.state.is_terminal()
    }

    /// True while termination is being propagated to tasks.
    pub fn is_terminating(&self) -> bool {
        self.status.state == JobState::KillInitiated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_job() -> Job {
        Job::new(JobDescriptor::batch("render", 3, RetryPolicy::Never), 1_000)
    }

    #[test]
    fn test_job_state_forward_only() {
        assert!(JobState::Accepted.can_transition_to(JobState::KillInitiated));
        assert!(JobState::Accepted.can_transition_to(JobState::Finished));
        assert!(JobState::KillInitiated.can_transition_to(JobState::Finished));
        assert!(!JobState::KillInitiated.can_transition_to(JobState::Accepted));
        assert!(!JobState::Finished.can_transition_to(JobState::Accepted));
        assert!(!JobState::Finished.can_transition_to(JobState::KillInitiated));
    }

    #[test]
    fn test_with_state_records_timestamp() {
        let job = batch_job();
        let killed = job
            .with_state(JobState::KillInitiated, Some("user".into()), 2_000)
            .unwrap();
        assert_eq!(killed.status.state, JobState::KillInitiated);
        assert_eq!(killed.status.timestamp_ms, 2_000);
        assert!(killed.is_terminating());
    }

    #[test]
    fn test_with_state_rejects_backward_move() {
        let job = batch_job();
        let finished = job.with_state(JobState::Finished, None, 2_000).unwrap();
        let err = finished
            .with_state(JobState::KillInitiated, None, 3_000)
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_service_capacity_validation() {
        assert!(ServiceCapacity::new(1, 3, 5).is_ok());
        assert!(matches!(
            ServiceCapacity::new(4, 3, 5),
            Err(ModelError::InvalidCapacity { .. })
        ));
        assert!(matches!(
            ServiceCapacity::new(1, 6, 5),
            Err(ModelError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_descriptor_json_roundtrip() {
        let descriptor = JobDescriptor::service(
            "api",
            ServiceCapacity::new(1, 2, 4).unwrap(),
            RetryPolicy::Immediate { retries: 2 },
        );
        let json = serde_json::to_string(&descriptor).unwrap();
        let parsed: JobDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(descriptor, parsed);
    }
}
