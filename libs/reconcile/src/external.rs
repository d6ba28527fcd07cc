//! Narrow trait seams to the orchestrator's external collaborators.
//!
//! The durable store backend, the placement/bin-packing service, and the
//! agent wire protocol all live outside this crate; the reconciliation core
//! only ever talks to them through these traits.

use armada_id::{JobId, TaskId};
use armada_model::{CapacityGroup, Job, Task};
use async_trait::async_trait;
use thiserror::Error;

/// Typed store failure codes, mapped by callers into not-found vs.
/// unexpected-failure branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    JobDoesNotExist,
    TaskDoesNotExist,
    Internal,
}

/// A failure reported by the durable store.
#[derive(Debug, Error, Clone)]
#[error("store error ({code:?}): {message}")]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn job_does_not_exist(id: JobId) -> Self {
        Self {
            code: StoreErrorCode::JobDoesNotExist,
            message: format!("job {id} does not exist"),
        }
    }

    pub fn task_does_not_exist(id: TaskId) -> Self {
        Self {
            code: StoreErrorCode::TaskDoesNotExist,
            message: format!("task {id} does not exist"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: StoreErrorCode::Internal,
            message: message.into(),
        }
    }

    /// True for the not-found family of codes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code,
            StoreErrorCode::JobDoesNotExist | StoreErrorCode::TaskDoesNotExist
        )
    }
}

/// Durable persistence for jobs and tasks.
///
/// Deleting a job or task archives it: the record leaves the active
/// collection and stays readable (never mutable) through the archived
/// getters.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
    async fn list_archived_jobs(&self) -> Result<Vec<Job>, StoreError>;
    async fn get_job(&self, id: JobId) -> Result<Job, StoreError>;
    async fn get_archived_job(&self, id: JobId) -> Result<Job, StoreError>;
    async fn put_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn delete_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn list_tasks_for_job(&self, job_id: JobId) -> Result<Vec<Task>, StoreError>;
    async fn get_task(&self, id: TaskId) -> Result<Task, StoreError>;
    async fn get_archived_task(&self, id: TaskId) -> Result<Task, StoreError>;
    async fn put_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn replace_task(&self, old: &Task, new: &Task) -> Result<(), StoreError>;
    async fn delete_task(&self, task: &Task) -> Result<(), StoreError>;
}

/// A failure reported by the placement service.
#[derive(Debug, Error, Clone)]
pub enum PlacementError {
    /// The request was understood but cannot be satisfied right now.
    #[error("placement rejected: {0}")]
    Rejected(String),
    /// The placement service could not be reached.
    #[error("placement unavailable: {0}")]
    Unavailable(String),
}

/// Accepts a task plus its capacity-group constraints; the placement
/// outcome is reported asynchronously and consumed into the running model.
#[async_trait]
pub trait PlacementService: Send + Sync {
    async fn request_placement(
        &self,
        job: &Job,
        task: &Task,
        group: &CapacityGroup,
    ) -> Result<(), PlacementError>;
}

/// A failure reported by the agent-kill service.
#[derive(Debug, Error, Clone)]
#[error("agent kill failed for {task_id}: {message}")]
pub struct KillError {
    pub task_id: TaskId,
    pub message: String,
}

/// Requests termination of a task on its owning agent. The result is
/// observed as a running-model state transition.
#[async_trait]
pub trait AgentKillService: Send + Sync {
    async fn kill_task(&self, task_id: TaskId, reason: &str) -> Result<(), KillError>;
}

/// Read-only capacity-group configuration.
pub trait CapacityGroupService: Send + Sync {
    /// Looks up a group by name.
    fn capacity_group(&self, name: &str) -> Option<CapacityGroup>;

    /// Group used when a descriptor names an unknown group.
    fn default_group(&self) -> CapacityGroup {
        CapacityGroup::default()
    }

    /// Resolves a name, falling back to the default group.
    fn resolve(&self, name: &str) -> CapacityGroup {
        self.capacity_group(name)
            .unwrap_or_else(|| self.default_group())
    }
}
