//! Job-level change actions.

use std::sync::Arc;

use armada_id::JobId;
use armada_model::{Job, Task};
use async_trait::async_trait;
use tracing::debug;

use crate::action::{ActionError, ActionKind, ChangeAction, ModelUpdate, Mutation};
use crate::clock::Clock;
use crate::external::JobStore;

/// Persists the reference job entity to the store.
///
/// Falls back to an insert when the store does not know the job yet, so the
/// same action covers first-write and divergence repair.
pub struct WriteJobAction {
    store: Arc<dyn JobStore>,
    job: Job,
}

impl WriteJobAction {
    pub fn new(store: Arc<dyn JobStore>, job: Job) -> Self {
        Self { store, job }
    }
}

#[async_trait]
impl ChangeAction for WriteJobAction {
    fn kind(&self) -> ActionKind {
        ActionKind::WriteJob
    }

    fn job_id(&self) -> JobId {
        self.job.id
    }

    fn summary(&self) -> String {
        format!("write job {} ({})", self.job.id, self.job.status.state)
    }

    async fn execute(&self, _clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError> {
        match self.store.update_job(&self.job).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => self.store.put_job(&self.job).await?,
            Err(err) => return Err(err.into()),
        }
        debug!(job_id = %self.job.id, "Persisted job record");
        Ok(vec![ModelUpdate::store(Mutation::PutJob(self.job.clone()))])
    }
}

/// Deletes a finished job (and its tasks) from the store's active set,
/// archiving the records, and removes the job from all three models.
///
/// Emitted only when a resolution pass produced no other action, so the
/// job is known to have no outstanding divergence.
pub struct RemoveCompletedJobAction {
    store: Arc<dyn JobStore>,
    job: Job,
    store_tasks: Vec<Task>,
}

impl RemoveCompletedJobAction {
    pub fn new(store: Arc<dyn JobStore>, job: Job, store_tasks: Vec<Task>) -> Self {
        Self {
            store,
            job,
            store_tasks,
        }
    }
}

#[async_trait]
impl ChangeAction for RemoveCompletedJobAction {
    fn kind(&self) -> ActionKind {
        ActionKind::RemoveCompletedJob
    }

    fn job_id(&self) -> JobId {
        self.job.id
    }

    fn summary(&self) -> String {
        format!(
            "remove completed job {} ({} archived tasks)",
            self.job.id,
            self.store_tasks.len()
        )
    }

    async fn execute(&self, _clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError> {
        for task in &self.store_tasks {
            match self.store.delete_task(task).await {
                Ok(()) => {}
                // Already archived by an earlier attempt.
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        match self.store.delete_job(&self.job).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        debug!(job_id = %self.job.id, "Archived completed job");
        Ok(vec![
            ModelUpdate::store(Mutation::RemoveJob),
            ModelUpdate::running(Mutation::RemoveJob),
            ModelUpdate::reference(Mutation::RemoveJob),
        ])
    }
}
