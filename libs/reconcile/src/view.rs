//! Read-only projections over a job's holder tree.
//!
//! A view exposes the job entity, its task list in index order, and the
//! required task count for the job type. Pure reads over an immutable
//! snapshot; no side effects.

use std::collections::BTreeSet;

use armada_model::{Job, JobExt, Task};

use crate::holder::EntityHolder;

/// Common capability set shared by the batch and service views.
pub trait JobView {
    fn job_holder(&self) -> &EntityHolder;

    fn job(&self) -> &Job;

    /// Tasks ordered by (index, resubmit number). Finite and restartable.
    fn tasks(&self) -> &[Task];

    fn task_by_id(&self, id: &str) -> Option<&Task>;

    /// Target task count derived from the job extension; zero once the job
    /// is finished.
    fn required_size(&self) -> u32;
}

fn collect_tasks(holder: &EntityHolder) -> Vec<Task> {
    let mut tasks: Vec<Task> = holder.children().filter_map(|c| c.task().cloned()).collect();
    tasks.sort_by_key(|t| (t.index, t.resubmit_number));
    tasks
}

/// View over a batch job: fixed required size, live index set precomputed.
pub struct BatchJobView {
    holder: EntityHolder,
    job: Job,
    tasks: Vec<Task>,
    indexes: BTreeSet<u32>,
}

impl BatchJobView {
    /// Returns `None` if the holder's root entity is not a job (a driving
    /// harness bug; callers log and skip the cycle).
    pub fn new(holder: &EntityHolder) -> Option<Self> {
        let job = holder.job()?.clone();
        let tasks = collect_tasks(holder);
        let indexes = tasks.iter().map(|t| t.index).collect();
        Some(Self {
            holder: holder.clone(),
            job,
            tasks,
            indexes,
        })
    }

    /// Indexes currently occupied by a live reference task.
    pub fn indexes(&self) -> &BTreeSet<u32> {
        &self.indexes
    }

    /// The latest task generation at `index`, if any.
    pub fn task_at_index(&self, index: u32) -> Option<&Task> {
        self.tasks.iter().rev().find(|t| t.index == index)
    }
}

impl JobView for BatchJobView {
    fn job_holder(&self) -> &EntityHolder {
        &self.holder
    }

    fn job(&self) -> &Job {
        &self.job
    }

    fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    fn task_by_id(&self, id: &str) -> Option<&Task> {
        self.holder.find_by_id(id).and_then(|h| h.task())
    }

    fn required_size(&self) -> u32 {
        if self.job.is_finished() {
            return 0;
        }
        match self.job.descriptor.ext {
            JobExt::Batch { size } => size,
            // A service descriptor under the batch view cannot size itself.
            JobExt::Service { .. } => 0,
        }
    }
}

/// View over a service job: required size follows desired capacity.
pub struct ServiceJobView {
    holder: EntityHolder,
    job: Job,
    tasks: Vec<Task>,
    indexes: BTreeSet<u32>,
}

impl ServiceJobView {
    pub fn new(holder: &EntityHolder) -> Option<Self> {
        let job = holder.job()?.clone();
        let tasks = collect_tasks(holder);
        let indexes = tasks.iter().map(|t| t.index).collect();
        Some(Self {
            holder: holder.clone(),
            job,
            tasks,
            indexes,
        })
    }

    pub fn indexes(&self) -> &BTreeSet<u32> {
        &self.indexes
    }
}

impl JobView for ServiceJobView {
    fn job_holder(&self) -> &EntityHolder {
        &self.holder
    }

    fn job(&self) -> &Job {
        &self.job
    }

    fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    fn task_by_id(&self, id: &str) -> Option<&Task> {
        self.holder.find_by_id(id).and_then(|h| h.task())
    }

    fn required_size(&self) -> u32 {
        if self.job.is_finished() {
            return 0;
        }
        match self.job.descriptor.ext {
            JobExt::Service { capacity } => capacity.desired,
            JobExt::Batch { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_model::{JobDescriptor, RetryPolicy, ServiceCapacity};

    #[test]
    fn test_batch_view_orders_tasks_by_index() {
        let job = Job::new(JobDescriptor::batch("render", 3, RetryPolicy::Never), 0);
        let mut holder = EntityHolder::from_job(job.clone());
        for index in [2u32, 0, 1] {
            holder = holder.with_child(EntityHolder::from_task(Task::new(job.id, index, 10)));
        }

        let view = BatchJobView::new(&holder).unwrap();
        let indexes: Vec<u32> = view.tasks().iter().map(|t| t.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(view.required_size(), 3);
    }

    #[test]
    fn test_required_size_zero_once_finished() {
        let job = Job::new(JobDescriptor::batch("render", 3, RetryPolicy::Never), 0);
        let finished = job
            .with_state(armada_model::JobState::Finished, None, 10)
            .unwrap();
        let view = BatchJobView::new(&EntityHolder::from_job(finished)).unwrap();
        assert_eq!(view.required_size(), 0);
    }

    #[test]
    fn test_service_view_sizes_from_desired_capacity() {
        let job = Job::new(
            JobDescriptor::service(
                "api",
                ServiceCapacity::new(1, 4, 8).unwrap(),
                RetryPolicy::Immediate { retries: 2 },
            ),
            0,
        );
        let view = ServiceJobView::new(&EntityHolder::from_job(job)).unwrap();
        assert_eq!(view.required_size(), 4);
    }

    #[test]
    fn test_view_rejects_task_root() {
        let task = Task::new(armada_id::JobId::new(), 0, 0);
        assert!(BatchJobView::new(&EntityHolder::from_task(task)).is_none());
    }

    proptest::proptest! {
        /// Whatever order tasks were inserted in, the view hands them out
        /// ordered by (index, resubmit number).
        #[test]
        fn prop_tasks_ordered_by_index_then_generation(
            indexes in proptest::collection::vec(0u32..8, 1..12)
        ) {
            let job = Job::new(JobDescriptor::batch("render", 8, RetryPolicy::Never), 0);
            let mut holder = EntityHolder::from_job(job.clone());
            for index in indexes {
                holder = holder.with_child(EntityHolder::from_task(Task::new(job.id, index, 10)));
            }

            let view = BatchJobView::new(&holder).unwrap();
            let keys: Vec<(u32, u32)> = view
                .tasks()
                .iter()
                .map(|t| (t.index, t.resubmit_number))
                .collect();
            let mut sorted = keys.clone();
            sorted.sort();
            proptest::prop_assert_eq!(keys, sorted);
        }
    }
}
