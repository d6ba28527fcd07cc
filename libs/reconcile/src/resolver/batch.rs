//! Difference resolver for batch jobs.

use std::sync::Arc;

use armada_model::{should_retry, Job, JobState, Task};
use tracing::warn;

use crate::action::{
    ChangeAction, CreateOrReplaceTaskAction, StartNewTaskAction, WriteJobAction, WriteTaskAction,
};
use crate::clock::Clock;
use crate::config::ReconcilerConfiguration;
use crate::external::{AgentKillService, CapacityGroupService, JobStore, PlacementService};
use crate::holder::EntityHolder;
use crate::interceptor::{RateLimiterInterceptor, RetryActionInterceptor, TokenBucket};
use crate::resolver::{support, DifferenceResolver};
use crate::view::{BatchJobView, JobView};

/// Resolver for fixed-size batch jobs.
///
/// Decision order per cycle: kill-initiated short-circuit, finished
/// short-circuit, job-size inconsistencies, missing running tasks,
/// stuck-state timeouts, then the store-sync pass, and finally the
/// remove-completed-job action once nothing else is left to do.
pub struct BatchDifferenceResolver {
    configuration: ReconcilerConfiguration,
    store: Arc<dyn JobStore>,
    placement: Arc<dyn PlacementService>,
    agent_kill: Arc<dyn AgentKillService>,
    capacity_groups: Arc<dyn CapacityGroupService>,
    clock: Arc<dyn Clock>,
    store_write_retry: RetryActionInterceptor,
    new_task_rate_limiter: RateLimiterInterceptor,
}

impl BatchDifferenceResolver {
    pub fn new(
        configuration: ReconcilerConfiguration,
        store: Arc<dyn JobStore>,
        placement: Arc<dyn PlacementService>,
        agent_kill: Arc<dyn AgentKillService>,
        capacity_groups: Arc<dyn CapacityGroupService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store_write_retry = RetryActionInterceptor::new(
            "store_write",
            configuration.store_write_retry_initial_delay_ms,
            configuration.store_write_retry_max_delay_ms,
        );
        let new_task_rate_limiter = RateLimiterInterceptor::new(
            "new_task",
            TokenBucket {
                capacity: configuration.new_task_bucket_capacity,
                refill_interval_ms: configuration.new_task_refill_interval_ms,
                refill_amount: configuration.new_task_refill_amount,
            },
        );
        Self {
            configuration,
            store,
            placement,
            agent_kill,
            capacity_groups,
            clock,
            store_write_retry,
            new_task_rate_limiter,
        }
    }

    fn apply_runtime(
        &self,
        ref_view: &BatchJobView,
        running_view: &BatchJobView,
        store_model: &EntityHolder,
        budget: &mut u64,
    ) -> Vec<Box<dyn ChangeAction>> {
        if ref_view.job().is_terminating() {
            return support::kill_all_active(running_view, &self.agent_kill);
        }
        if ref_view.job().is_finished() {
            return Vec::new();
        }

        let mut actions = self.find_job_size_inconsistencies(ref_view, store_model, budget);
        actions.extend(self.find_missing_running_tasks(ref_view, running_view, budget));
        actions.extend(support::task_state_timeouts(
            running_view,
            &self.configuration,
            self.clock.as_ref(),
            &self.agent_kill,
        ));
        actions
    }

    /// Ensures the reference job has a task at every index below the
    /// required size. Creation is gated on the store-write backoff and
    /// bounded by the new-task budget; deferred indexes come back on the
    /// next cycle.
    fn find_job_size_inconsistencies(
        &self,
        ref_view: &BatchJobView,
        store_model: &EntityHolder,
        budget: &mut u64,
    ) -> Vec<Box<dyn ChangeAction>> {
        let can_update_store = self
            .store_write_retry
            .execution_limits(store_model, self.clock.as_ref());
        if !can_update_store || ref_view.tasks().len() as u32 >= ref_view.required_size() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for index in 0..ref_view.required_size() {
            if *budget == 0 {
                break;
            }
            if ref_view.indexes().contains(&index) {
                continue;
            }
            actions.push(self.create_new_task_action(ref_view.job(), None, index));
            *budget -= 1;
        }
        actions
    }

    /// Ensures each reference task has a counterpart in the running model,
    /// consuming one rate-limit token per start emitted.
    fn find_missing_running_tasks(
        &self,
        ref_view: &BatchJobView,
        running_view: &BatchJobView,
        budget: &mut u64,
    ) -> Vec<Box<dyn ChangeAction>> {
        let mut actions: Vec<Box<dyn ChangeAction>> = Vec::new();
        for ref_task in ref_view.tasks() {
            if *budget == 0 {
                break;
            }
            if running_view.task_by_id(&ref_task.id.to_string()).is_none() {
                actions.push(self.new_task_rate_limiter.wrap(Box::new(
                    StartNewTaskAction::new(
                        Arc::clone(&self.capacity_groups),
                        Arc::clone(&self.placement),
                        ref_view.job().clone(),
                        ref_task.clone(),
                    ),
                )));
                *budget -= 1;
            }
        }
        actions
    }

    /// Syncs the store model to the reference model: divergent job or task
    /// records get write actions, and an in-sync failed task that is
    /// retry-eligible gets a replacement generation.
    fn apply_store(
        &self,
        ref_view: &BatchJobView,
        store_model: &EntityHolder,
        budget: &mut u64,
    ) -> Vec<Box<dyn ChangeAction>> {
        if !self
            .store_write_retry
            .execution_limits(store_model, self.clock.as_ref())
        {
            return Vec::new();
        }

        let mut actions: Vec<Box<dyn ChangeAction>> = Vec::new();
        let ref_job = ref_view.job();

        let store_job_in_sync = store_model.job().map(|j| j == ref_job).unwrap_or(false);
        if !store_job_in_sync {
            actions.push(self.store_write_retry.wrap(Box::new(WriteJobAction::new(
                Arc::clone(&self.store),
                ref_job.clone(),
            ))));
        }

        for ref_task in ref_view.tasks() {
            let id = ref_task.id.to_string();
            let ref_holder = match ref_view.job_holder().find_by_id(&id) {
                Some(holder) => holder,
                None => continue,
            };
            match store_model.find_by_id(&id) {
                Some(store_holder) if support::are_equivalent(store_holder, ref_holder) => {
                    let Some(store_task) = store_holder.task() else {
                        continue;
                    };
                    // A finished job never resurrects tasks, whatever retry
                    // budget the final generation left behind.
                    if !ref_job.is_finished()
                        && should_retry(ref_job, store_task)
                        && self.retry_delay_elapsed(ref_job, store_task)
                        && *budget > 0
                    {
                        actions.push(self.create_new_task_action(
                            ref_job,
                            Some(store_task.clone()),
                            store_task.index,
                        ));
                        *budget -= 1;
                    }
                }
                _ => {
                    actions.push(self.store_write_retry.wrap(Box::new(WriteTaskAction::new(
                        Arc::clone(&self.store),
                        ref_job.clone(),
                        ref_task.clone(),
                    ))));
                }
            }
        }
        actions
    }

    fn retry_delay_elapsed(&self, job: &Job, task: &Task) -> bool {
        let delay = job
            .descriptor
            .retry_policy
            .delay_ms(task.resubmit_number);
        self.clock.now_ms() >= task.status.timestamp_ms + delay
    }

    fn create_new_task_action(
        &self,
        job: &Job,
        previous: Option<Task>,
        index: u32,
    ) -> Box<dyn ChangeAction> {
        // Rate limiter outside retry: eligibility and token consumption
        // come first, the backoff state only moves when an attempt runs.
        self.new_task_rate_limiter
            .wrap(self.store_write_retry.wrap(Box::new(
                CreateOrReplaceTaskAction::new(
                    Arc::clone(&self.store),
                    job.clone(),
                    previous,
                    index,
                ),
            )))
    }
}

impl DifferenceResolver for BatchDifferenceResolver {
    fn resolve(
        &self,
        reference: &EntityHolder,
        running: &EntityHolder,
        store_model: &EntityHolder,
    ) -> Vec<Box<dyn ChangeAction>> {
        let (Some(ref_view), Some(running_view)) =
            (BatchJobView::new(reference), BatchJobView::new(running))
        else {
            warn!("Batch resolver invoked on a non-job holder; skipping cycle");
            return Vec::new();
        };

        let mut budget = self
            .new_task_rate_limiter
            .execution_limits(running_view.job_holder(), self.clock.as_ref());

        let mut actions = self.apply_runtime(&ref_view, &running_view, store_model, &mut budget);

        // Termination propagation excludes every other action kind.
        if !support::has_job_state(reference, JobState::KillInitiated) {
            actions.extend(self.apply_store(&ref_view, store_model, &mut budget));
            if actions.is_empty() {
                actions.extend(support::remove_completed_job(
                    reference,
                    store_model,
                    &self.store,
                ));
            }
        }
        actions
    }
}
