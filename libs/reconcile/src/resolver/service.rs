//! Difference resolver for service jobs.

use std::sync::Arc;

use armada_model::{reasons, should_retry, Job, JobState, Task};
use tracing::warn;

use crate::action::{
    ChangeAction, CreateOrReplaceTaskAction, InitiateTaskKillAction, StartNewTaskAction,
    WriteJobAction, WriteTaskAction,
};
use crate::clock::Clock;
use crate::config::ReconcilerConfiguration;
use crate::external::{AgentKillService, CapacityGroupService, JobStore, PlacementService};
use crate::holder::EntityHolder;
use crate::interceptor::{RateLimiterInterceptor, RetryActionInterceptor, TokenBucket};
use crate::resolver::{support, DifferenceResolver};
use crate::view::{JobView, ServiceJobView};

/// Resolver for long-running service jobs.
///
/// Same decision skeleton as the batch resolver with two differences: the
/// required size follows the descriptor's desired capacity instead of a
/// fixed batch size, and a scale-down pass kills active tasks whose index
/// fell above the desired count.
pub struct ServiceDifferenceResolver {
    configuration: ReconcilerConfiguration,
    store: Arc<dyn JobStore>,
    placement: Arc<dyn PlacementService>,
    agent_kill: Arc<dyn AgentKillService>,
    capacity_groups: Arc<dyn CapacityGroupService>,
    clock: Arc<dyn Clock>,
    store_write_retry: RetryActionInterceptor,
    new_task_rate_limiter: RateLimiterInterceptor,
}

impl ServiceDifferenceResolver {
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
        ref_view: &ServiceJobView,
        running_view: &ServiceJobView,
        store_model: &EntityHolder,
        budget: &mut u64,
    ) -> Vec<Box<dyn ChangeAction>> {
        if ref_view.job().is_terminating() {
            return support::kill_all_active(running_view, &self.agent_kill);
        }
        if ref_view.job().is_finished() {
            return Vec::new();
        }

        let mut actions = self.scale_up(ref_view, store_model, budget);
        actions.extend(self.scale_down(ref_view, running_view));
        actions.extend(self.find_missing_running_tasks(ref_view, running_view, budget));
        actions.extend(support::task_state_timeouts(
            running_view,
            &self.configuration,
            self.clock.as_ref(),
            &self.agent_kill,
        ));
        actions
    }

    /// Fills indexes below the desired capacity that have no live reference
    /// task, bounded by the new-task budget.
    fn scale_up(
        &self,
        ref_view: &ServiceJobView,
        store_model: &EntityHolder,
        budget: &mut u64,
    ) -> Vec<Box<dyn ChangeAction>> {
        let can_update_store = self
            .store_write_retry
            .execution_limits(store_model, self.clock.as_ref());
        if !can_update_store {
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

    /// Kills active tasks whose index is at or above the desired capacity.
    /// Terminal excess tasks are left for store sync and natural cleanup.
    fn scale_down(
        &self,
        ref_view: &ServiceJobView,
        running_view: &ServiceJobView,
    ) -> Vec<Box<dyn ChangeAction>> {
        let desired = ref_view.required_size();
        let mut actions: Vec<Box<dyn ChangeAction>> = Vec::new();
        for ref_task in ref_view.tasks() {
            if ref_task.index < desired || ref_task.is_finished() {
                continue;
            }
            // Kill the running copy when there is one so the recorded state
            // reflects what the agent last reported.
            let victim = running_view
                .task_by_id(&ref_task.id.to_string())
                .unwrap_or(ref_task);
            actions.push(Box::new(InitiateTaskKillAction::new(
                Arc::clone(&self.agent_kill),
                victim.clone(),
                reasons::SCALED_DOWN,
            )));
        }
        actions
    }

    fn find_missing_running_tasks(
        &self,
        ref_view: &ServiceJobView,
        running_view: &ServiceJobView,
        budget: &mut u64,
    ) -> Vec<Box<dyn ChangeAction>> {
        let desired = ref_view.required_size();
        let mut actions: Vec<Box<dyn ChangeAction>> = Vec::new();
        for ref_task in ref_view.tasks() {
            if *budget == 0 {
                break;
            }
            // Do not start tasks the scale-down pass is about to kill.
            if ref_task.index >= desired {
                continue;
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

    fn apply_store(
        &self,
        ref_view: &ServiceJobView,
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
        let desired = ref_view.required_size();

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
                    // Replacement only makes sense for indexes still within
                    // the desired capacity.
                    if store_task.index < desired
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

impl DifferenceResolver for ServiceDifferenceResolver {
    fn resolve(
        &self,
        reference: &EntityHolder,
        running: &EntityHolder,
        store_model: &EntityHolder,
    ) -> Vec<Box<dyn ChangeAction>> {
        let (Some(ref_view), Some(running_view)) =
            (ServiceJobView::new(reference), ServiceJobView::new(running))
        else {
            warn!("Service resolver invoked on a non-job holder; skipping cycle");
            return Vec::new();
        };

        let mut budget = self
            .new_task_rate_limiter
            .execution_limits(running_view.job_holder(), self.clock.as_ref());

        let mut actions = self.apply_runtime(&ref_view, &running_view, store_model, &mut budget);

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
