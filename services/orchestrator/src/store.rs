//! In-memory [`JobStore`] implementation.
//!
//! Active and archived records live in separate collections; deleting a job
//! or task moves it into the archive, where it stays readable but is never
//! mutated again.

use std::collections::HashMap;

use armada_id::{JobId, TaskId};
use armada_model::{Job, Task};
use armada_reconcile::{JobStore, StoreError};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
struct Collections {
    jobs: HashMap<JobId, Job>,
    tasks: HashMap<TaskId, Task>,
    archived_jobs: HashMap<JobId, Job>,
    archived_tasks: HashMap<TaskId, Task>,
}

/// Store backend holding everything in process memory.
#[derive(Default)]
pub struct InMemoryJobStore {
    collections: RwLock<Collections>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.jobs.values().cloned().collect())
    }

    async fn list_archived_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.archived_jobs.values().cloned().collect())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        let collections = self.collections.read().await;
        collections
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::job_does_not_exist(id))
    }

    async fn get_archived_job(&self, id: JobId) -> Result<Job, StoreError> {
        let collections = self.collections.read().await;
        collections
            .archived_jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::job_does_not_exist(id))
    }

    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if !collections.jobs.contains_key(&job.id) {
            return Err(StoreError::job_does_not_exist(job.id));
        }
        collections.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn delete_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let removed = collections
            .jobs
            .remove(&job.id)
            .ok_or_else(|| StoreError::job_does_not_exist(job.id))?;
        collections.archived_jobs.insert(removed.id, removed);
        Ok(())
    }

    async fn list_tasks_for_job(&self, job_id: JobId) -> Result<Vec<Task>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, StoreError> {
        let collections = self.collections.read().await;
        collections
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::task_does_not_exist(id))
    }

    async fn get_archived_task(&self, id: TaskId) -> Result<Task, StoreError> {
        let collections = self.collections.read().await;
        collections
            .archived_tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::task_does_not_exist(id))
    }

    async fn put_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if !collections.tasks.contains_key(&task.id) {
            return Err(StoreError::task_does_not_exist(task.id));
        }
        collections.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn replace_task(&self, old: &Task, new: &Task) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if let Some(previous) = collections.tasks.remove(&old.id) {
            collections.archived_tasks.insert(previous.id, previous);
        }
        collections.tasks.insert(new.id, new.clone());
        Ok(())
    }

    async fn delete_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let removed = collections
            .tasks
            .remove(&task.id)
            .ok_or_else(|| StoreError::task_does_not_exist(task.id))?;
        collections.archived_tasks.insert(removed.id, removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_model::{JobDescriptor, RetryPolicy, TaskState};

    fn job() -> Job {
        Job::new(JobDescriptor::batch("encode", 1, RetryPolicy::Never), 0)
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let store = InMemoryJobStore::new();
        let job = job();

        let err = store.update_job(&job).await.unwrap_err();
        assert!(err.is_not_found());

        store.put_job(&job).await.unwrap();
        store.update_job(&job).await.unwrap();
        assert_eq!(store.get_job(job.id).await.unwrap().id, job.id);
    }

    #[tokio::test]
    async fn test_delete_archives_instead_of_dropping() {
        let store = InMemoryJobStore::new();
        let job = job();
        let task = Task::new(job.id, 0, 10);

        store.put_job(&job).await.unwrap();
        store.put_task(&task).await.unwrap();
        store.delete_task(&task).await.unwrap();
        store.delete_job(&job).await.unwrap();

        assert!(store.get_job(job.id).await.unwrap_err().is_not_found());
        assert_eq!(store.get_archived_job(job.id).await.unwrap().id, job.id);
        assert_eq!(store.get_archived_task(task.id).await.unwrap().id, task.id);
        // Archived records never come back as active.
        assert!(store.list_tasks_for_job(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_archives_the_previous_generation() {
        let store = InMemoryJobStore::new();
        let job = job();
        let gen0 = Task::new(job.id, 0, 10)
            .with_state(TaskState::Finished, Some("failed".into()), 20)
            .unwrap();
        let gen1 = gen0.resubmit(30);

        store.put_task(&gen0).await.unwrap();
        store.replace_task(&gen0, &gen1).await.unwrap();

        assert!(store.get_task(gen0.id).await.unwrap_err().is_not_found());
        assert_eq!(store.get_archived_task(gen0.id).await.unwrap().id, gen0.id);
        let active = store.get_task(gen1.id).await.unwrap();
        assert_eq!(active.resubmit_number, 1);
        assert_eq!(active.status.state, TaskState::Accepted);
    }
}
