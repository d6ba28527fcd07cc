//! Task-level change actions.

use std::sync::Arc;

use armada_id::JobId;
use armada_model::{Job, Task, TaskState};
use async_trait::async_trait;
use tracing::debug;

use crate::action::{ActionError, ActionKind, ChangeAction, ModelUpdate, Mutation};
use crate::clock::Clock;
use crate::external::{AgentKillService, CapacityGroupService, JobStore, PlacementService};

/// Persists the reference copy of a task, repairing store divergence.
pub struct WriteTaskAction {
    store: Arc<dyn JobStore>,
    job: Job,
    task: Task,
}

impl WriteTaskAction {
    pub fn new(store: Arc<dyn JobStore>, job: Job, task: Task) -> Self {
        Self { store, job, task }
    }
}

#[async_trait]
impl ChangeAction for WriteTaskAction {
    fn kind(&self) -> ActionKind {
        ActionKind::WriteTask
    }

    fn job_id(&self) -> JobId {
        self.job.id
    }

    fn summary(&self) -> String {
        format!(
            "write task {} (index {}, {})",
            self.task.id, self.task.index, self.task.status.state
        )
    }

    async fn execute(&self, _clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError> {
        match self.store.update_task(&self.task).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => self.store.put_task(&self.task).await?,
            Err(err) => return Err(err.into()),
        }
        debug!(task_id = %self.task.id, index = self.task.index, "Persisted task record");
        Ok(vec![ModelUpdate::store(Mutation::PutTask(
            self.task.clone(),
        ))])
    }
}

/// Persists a fresh task generation at an index.
///
/// With no predecessor this creates generation zero (the job-size pass);
/// with a predecessor it archives the old record and persists a replacement
/// with an incremented resubmit number (the retry pass).
pub struct CreateOrReplaceTaskAction {
    store: Arc<dyn JobStore>,
    job: Job,
    previous: Option<Task>,
    index: u32,
}

impl CreateOrReplaceTaskAction {
    pub fn new(store: Arc<dyn JobStore>, job: Job, previous: Option<Task>, index: u32) -> Self {
        Self {
            store,
            job,
            previous,
            index,
        }
    }
}

#[async_trait]
impl ChangeAction for CreateOrReplaceTaskAction {
    fn kind(&self) -> ActionKind {
        ActionKind::CreateOrReplaceTask
    }

    fn job_id(&self) -> JobId {
        self.job.id
    }

    fn summary(&self) -> String {
        match &self.previous {
            Some(previous) => format!(
                "replace task at index {} (resubmit {})",
                self.index,
                previous.resubmit_number + 1
            ),
            None => format!("create task at index {}", self.index),
        }
    }

    async fn execute(&self, clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError> {
        let now_ms = clock.now_ms();
        let mut updates = Vec::new();

        let task = match &self.previous {
            Some(previous) => {
                let replacement = previous.resubmit(now_ms);
                self.store.replace_task(previous, &replacement).await?;
                let old_id = previous.id.to_string();
                updates.push(ModelUpdate::reference(Mutation::RemoveTask(old_id.clone())));
                updates.push(ModelUpdate::running(Mutation::RemoveTask(old_id.clone())));
                updates.push(ModelUpdate::store(Mutation::RemoveTask(old_id)));
                replacement
            }
            None => {
                let task = Task::new(self.job.id, self.index, now_ms);
                self.store.put_task(&task).await?;
                task
            }
        };

        debug!(
            job_id = %self.job.id,
            task_id = %task.id,
            index = task.index,
            resubmit = task.resubmit_number,
            "Created task generation"
        );
        updates.push(ModelUpdate::reference(Mutation::PutTask(task.clone())));
        updates.push(ModelUpdate::store(Mutation::PutTask(task)));
        Ok(updates)
    }
}

/// Hands a reference task to the placement service and registers it in the
/// running model. Placement outcomes arrive later as runtime events.
pub struct StartNewTaskAction {
    capacity_groups: Arc<dyn CapacityGroupService>,
    placement: Arc<dyn PlacementService>,
    job: Job,
    task: Task,
}

impl StartNewTaskAction {
    pub fn new(
        capacity_groups: Arc<dyn CapacityGroupService>,
        placement: Arc<dyn PlacementService>,
        job: Job,
        task: Task,
    ) -> Self {
        Self {
            capacity_groups,
            placement,
            job,
            task,
        }
    }
}

#[async_trait]
impl ChangeAction for StartNewTaskAction {
    fn kind(&self) -> ActionKind {
        ActionKind::StartNewTask
    }

    fn job_id(&self) -> JobId {
        self.job.id
    }

    fn summary(&self) -> String {
        format!("start task {} (index {})", self.task.id, self.task.index)
    }

    async fn execute(&self, _clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError> {
        let group = self
            .capacity_groups
            .resolve(&self.job.descriptor.capacity_group);
        self.placement
            .request_placement(&self.job, &self.task, &group)
            .await?;
        debug!(
            task_id = %self.task.id,
            capacity_group = %group.name,
            "Requested placement"
        );
        Ok(vec![ModelUpdate::running(Mutation::PutTask(
            self.task.clone(),
        ))])
    }
}

/// Requests termination of a task on its owning agent.
///
/// Re-issuing a kill for a task already in `KillInitiated` repeats the
/// agent call without a model transition, so stuck kills are retried
/// harmlessly.
pub struct InitiateTaskKillAction {
    agent_kill: Arc<dyn AgentKillService>,
    task: Task,
    reason: String,
}

impl InitiateTaskKillAction {
    pub fn new(agent_kill: Arc<dyn AgentKillService>, task: Task, reason: impl Into<String>) -> Self {
        Self {
            agent_kill,
            task,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChangeAction for InitiateTaskKillAction {
    fn kind(&self) -> ActionKind {
        ActionKind::InitiateTaskKill
    }

    fn job_id(&self) -> JobId {
        self.task.job_id
    }

    fn summary(&self) -> String {
        format!("kill task {} ({})", self.task.id, self.reason)
    }

    async fn execute(&self, clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError> {
        self.agent_kill.kill_task(self.task.id, &self.reason).await?;
        debug!(task_id = %self.task.id, reason = %self.reason, "Requested task kill");

        if !self
            .task
            .status
            .state
            .can_transition_to(TaskState::KillInitiated)
        {
            return Ok(Vec::new());
        }
        let killed = self.task.with_state(
            TaskState::KillInitiated,
            Some(self.reason.clone()),
            clock.now_ms(),
        )?;
        Ok(vec![ModelUpdate::running(Mutation::PutTask(killed))])
    }
}
