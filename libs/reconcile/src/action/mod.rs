//! Change actions: discrete, independently-applicable corrective mutations.
//!
//! A resolver returns actions as a list; the engine executes them in list
//! order. Each action optionally performs one external call and, on
//! success, yields [`ModelUpdate`]s the engine merges into the holder
//! trees. Failures are typed so the wrapping retry interceptor can absorb
//! them.

mod job;
mod task;

pub use job::{RemoveCompletedJobAction, WriteJobAction};
pub use task::{
    CreateOrReplaceTaskAction, InitiateTaskKillAction, StartNewTaskAction, WriteTaskAction,
};

use armada_id::JobId;
use armada_model::{Job, ModelError, Task};
use async_trait::async_trait;
use thiserror::Error;

use crate::clock::Clock;
use crate::external::{KillError, PlacementError, StoreError};
use crate::interceptor::TokenBucket;

/// Which of the three parallel models an update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Reference,
    Running,
    Store,
}

/// A single mutation against one model's holder tree.
///
/// Tag mutations are read-modify-write operations the engine applies
/// against the *current* root, so several actions in one cycle compose
/// correctly (each token consumption sees the previous one).
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Replace the root job entity.
    PutJob(Job),
    /// Add or replace a task holder, keyed by task id.
    PutTask(Task),
    /// Remove the task holder with this id, if present.
    RemoveTask(String),
    /// Remove the whole job from the active set.
    RemoveJob,
    /// Record a failed attempt: bumps the failure count and pushes the
    /// backoff deadline out exponentially.
    RecordActionFailure {
        tag: String,
        initial_delay_ms: i64,
        max_delay_ms: i64,
    },
    /// Drop the backoff tag after a successful attempt.
    ClearActionFailures { tag: String },
    /// Consume one token from the named bucket, refilling lazily first.
    ConsumeRateLimitToken { tag: String, bucket: TokenBucket },
}

/// A mutation plus the model it targets.
#[derive(Debug, Clone)]
pub struct ModelUpdate {
    pub target: Model,
    pub mutation: Mutation,
}

impl ModelUpdate {
    pub fn new(target: Model, mutation: Mutation) -> Self {
        Self { target, mutation }
    }

    pub fn reference(mutation: Mutation) -> Self {
        Self::new(Model::Reference, mutation)
    }

    pub fn running(mutation: Mutation) -> Self {
        Self::new(Model::Running, mutation)
    }

    pub fn store(mutation: Mutation) -> Self {
        Self::new(Model::Store, mutation)
    }
}

/// Discriminates action variants for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    WriteJob,
    WriteTask,
    CreateOrReplaceTask,
    StartNewTask,
    InitiateTaskKill,
    RemoveCompletedJob,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::WriteJob => "write_job",
            ActionKind::WriteTask => "write_task",
            ActionKind::CreateOrReplaceTask => "create_or_replace_task",
            ActionKind::StartNewTask => "start_new_task",
            ActionKind::InitiateTaskKill => "initiate_task_kill",
            ActionKind::RemoveCompletedJob => "remove_completed_job",
        };
        write!(f, "{s}")
    }
}

/// Typed failure raised while executing an action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Retryable; absorbed by the retry interceptor, never surfaced to the
    /// resolver caller.
    #[error(transparent)]
    StoreWrite(#[from] StoreError),

    /// Retryable subject to the job's retry policy.
    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    AgentKill(#[from] KillError),

    /// Defensive: a driving-harness bug produced an illegal transition.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// A unit of corrective work computed by a resolver.
///
/// Execution never blocks the resolver: actions are returned as data and
/// run by the engine, which merges the resulting updates before the next
/// cycle.
#[async_trait]
pub trait ChangeAction: Send + Sync {
    fn kind(&self) -> ActionKind;

    fn job_id(&self) -> JobId;

    /// One-line human-readable description for logs.
    fn summary(&self) -> String;

    async fn execute(&self, clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError>;
}
