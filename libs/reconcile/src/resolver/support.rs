//! Helpers shared by the batch and service resolvers.

use std::sync::Arc;

use armada_model::{reasons, JobState, TaskState};

use crate::action::{ChangeAction, InitiateTaskKillAction, RemoveCompletedJobAction};
use crate::clock::Clock;
use crate::config::ReconcilerConfiguration;
use crate::external::{AgentKillService, JobStore};
use crate::holder::EntityHolder;
use crate::view::JobView;

/// True if the holder's root job is in `state`.
pub fn has_job_state(holder: &EntityHolder, state: JobState) -> bool {
    holder.job().map(|j| j.status.state == state).unwrap_or(false)
}

/// True if two holders carry equal entities (full structural equality; the
/// state-entry timestamp is part of the status and must match for the
/// copies to count as in sync).
pub fn are_equivalent(a: &EntityHolder, b: &EntityHolder) -> bool {
    a.entity() == b.entity()
}

/// Kill actions for every still-active task in the running model.
///
/// Used when the reference job is `KillInitiated`: termination is
/// propagated and all other checks are skipped. Tasks already in
/// `KillInitiated` are re-killed (the action is idempotent) so a lost agent
/// request is eventually repeated.
pub fn kill_all_active(
    running_view: &dyn JobView,
    agent_kill: &Arc<dyn AgentKillService>,
) -> Vec<Box<dyn ChangeAction>> {
    running_view
        .tasks()
        .iter()
        .filter(|task| !task.is_finished())
        .map(|task| {
            Box::new(InitiateTaskKillAction::new(
                Arc::clone(agent_kill),
                task.clone(),
                reasons::KILLED,
            )) as Box<dyn ChangeAction>
        })
        .collect()
}

/// Forced kills for running tasks stuck in one state past the configured
/// threshold, and for started tasks past the job's runtime limit.
pub fn task_state_timeouts(
    running_view: &dyn JobView,
    configuration: &ReconcilerConfiguration,
    clock: &dyn Clock,
    agent_kill: &Arc<dyn AgentKillService>,
) -> Vec<Box<dyn ChangeAction>> {
    let now_ms = clock.now_ms();
    let runtime_limit_ms = running_view.job().descriptor.runtime_limit_ms;
    let mut actions: Vec<Box<dyn ChangeAction>> = Vec::new();

    for task in running_view.tasks() {
        if task.is_finished() {
            continue;
        }
        let in_state_ms = now_ms.saturating_sub(task.status.timestamp_ms);

        if let Some(threshold) = configuration.timeout_for(task.status.state) {
            if in_state_ms >= threshold {
                actions.push(Box::new(InitiateTaskKillAction::new(
                    Arc::clone(agent_kill),
                    task.clone(),
                    reasons::STUCK_IN_STATE,
                )));
                continue;
            }
        }

        if task.status.state == TaskState::Started {
            if let Some(limit) = runtime_limit_ms {
                if in_state_ms >= limit {
                    actions.push(Box::new(InitiateTaskKillAction::new(
                        Arc::clone(agent_kill),
                        task.clone(),
                        reasons::RUNTIME_LIMIT_EXCEEDED,
                    )));
                }
            }
        }
    }

    actions
}

/// The final pass: once a job is finished and a resolution produced no
/// other action, archive it out of the active set.
pub fn remove_completed_job(
    reference: &EntityHolder,
    store_model: &EntityHolder,
    store: &Arc<dyn JobStore>,
) -> Vec<Box<dyn ChangeAction>> {
    if !has_job_state(reference, JobState::Finished) {
        return Vec::new();
    }
    let job = match store_model.job().or_else(|| reference.job()) {
        Some(job) => job.clone(),
        None => return Vec::new(),
    };
    let store_tasks = store_model
        .children()
        .filter_map(|c| c.task().cloned())
        .collect();
    vec![Box::new(RemoveCompletedJobAction::new(
        Arc::clone(store),
        job,
        store_tasks,
    ))]
}
