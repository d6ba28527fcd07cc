//! Per-job reconciliation engine.
//!
//! One engine instance owns the three model roots for a single job, runs
//! resolver cycles against them, executes the returned actions in order,
//! and merges the resulting model updates. All mutation flows through
//! [`ReconciliationEngine::apply_update`], which applies read-modify-write
//! mutations against the *current* root so actions within one cycle
//! compose.

use std::sync::Arc;

use armada_id::{JobId, TaskId};
use armada_model::{reasons, Job, JobExt, JobState, Task, TaskState};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::action::{Model, ModelUpdate, Mutation};
use crate::clock::Clock;
use crate::holder::{Entity, EntityHolder, TagValue};
use crate::interceptor::next_retry_tag;
use crate::resolver::DifferenceResolver;
use crate::view::{BatchJobView, JobView};

/// An observed task state change reported by placement or an agent.
#[derive(Debug, Clone)]
pub struct TaskRuntimeEvent {
    pub task_id: TaskId,
    pub state: TaskState,
    pub reason: Option<String>,
    pub timestamp_ms: i64,
}

/// Lifecycle notification emitted by an engine.
#[derive(Debug, Clone)]
pub enum JobManagerEvent {
    /// The reference job entity changed (state or descriptor).
    JobUpdated { job: Job },
    /// The job was archived out of the active set; the engine is done.
    JobClosed { job_id: JobId },
}

/// Result of one `trigger_cycle` run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOutcome {
    pub actions_emitted: usize,
    pub actions_failed: usize,
    /// True once the job has been archived; the caller should drop the
    /// engine.
    pub closed: bool,
}

/// Drives one job toward `reference == running == store`.
pub struct ReconciliationEngine {
    job_id: JobId,
    reference: EntityHolder,
    running: EntityHolder,
    store: EntityHolder,
    resolver: Box<dyn DifferenceResolver>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<JobManagerEvent>,
    closed: bool,
}

impl ReconciliationEngine {
    /// Creates an engine with all three models rooted at the same job
    /// entity. The caller persists the job before construction so the
    /// store model starts truthful.
    pub fn new(job: Job, resolver: Box<dyn DifferenceResolver>, clock: Arc<dyn Clock>) -> Self {
        let root = EntityHolder::from_job(job.clone());
        let (events, _) = broadcast::channel(64);
        Self {
            job_id: job.id,
            reference: root.clone(),
            running: root.clone(),
            store: root,
            resolver,
            clock,
            events,
            closed: false,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn reference(&self) -> &EntityHolder {
        &self.reference
    }

    pub fn running(&self) -> &EntityHolder {
        &self.running
    }

    pub fn store(&self) -> &EntityHolder {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobManagerEvent> {
        self.events.subscribe()
    }

    /// Runs one reconciliation cycle: completion evaluation, resolution,
    /// then in-order action execution with model-update merging.
    pub async fn trigger_cycle(&mut self) -> CycleOutcome {
        if self.closed {
            return CycleOutcome {
                closed: true,
                ..CycleOutcome::default()
            };
        }

        self.evaluate_job_completion();

        let actions = self
            .resolver
            .resolve(&self.reference, &self.running, &self.store);
        let mut outcome = CycleOutcome {
            actions_emitted: actions.len(),
            ..CycleOutcome::default()
        };

        for action in actions {
            debug!(
                job_id = %self.job_id,
                action = %action.kind(),
                "Executing change action: {}",
                action.summary()
            );
            match action.execute(self.clock.as_ref()).await {
                Ok(updates) => {
                    for update in updates {
                        self.apply_update(update);
                    }
                }
                Err(err) => {
                    outcome.actions_failed += 1;
                    warn!(
                        job_id = %self.job_id,
                        action = %action.kind(),
                        error = %err,
                        "Change action failed"
                    );
                }
            }
        }

        outcome.closed = self.closed;
        outcome
    }

    /// Moves the reference job forward on user-requested termination. The
    /// following cycles propagate kills, record the finished state, and
    /// archive the job.
    pub fn kill_job(&mut self) {
        let Some(job) = self.reference.job() else {
            return;
        };
        if job.status.state.is_terminal() {
            return;
        }
        let target = if self.reference.children().any(|c| {
            c.task().map(|t| !t.is_finished()).unwrap_or(false)
        }) {
            JobState::KillInitiated
        } else {
            // Nothing to wait for.
            JobState::Finished
        };
        match job.with_state(target, Some(reasons::KILLED.to_string()), self.clock.now_ms()) {
            Ok(updated) => {
                info!(job_id = %self.job_id, state = %target, "Job kill requested");
                self.replace_job(updated);
            }
            Err(err) => {
                warn!(job_id = %self.job_id, error = %err, "Ignoring illegal job kill");
            }
        }
    }

    /// Ingests an observed task state change into the reference and running
    /// models. Updating both keeps the store-sync pass truthful: the
    /// reference must reflect what actually happened before it is written
    /// back.
    pub fn apply_task_event(&mut self, event: &TaskRuntimeEvent) {
        let id = event.task_id.to_string();
        let Some(current) = self.reference.find_by_id(&id).and_then(|h| h.task()) else {
            debug!(
                job_id = %self.job_id,
                task_id = %event.task_id,
                "Dropping event for unknown task"
            );
            return;
        };

        match current.with_state(event.state, event.reason.clone(), event.timestamp_ms) {
            Ok(updated) => {
                let child = EntityHolder::from_task(updated);
                self.reference = self.reference.with_child(child.clone());
                self.running = self.running.with_child(child);
            }
            Err(err) => {
                // Stale or duplicate report; the models only move forward.
                debug!(
                    job_id = %self.job_id,
                    task_id = %event.task_id,
                    error = %err,
                    "Dropping non-monotonic task event"
                );
            }
        }
    }

    /// Applies one model update to the targeted root.
    fn apply_update(&mut self, update: ModelUpdate) {
        if let Mutation::RemoveJob = update.mutation {
            if update.target == Model::Store {
                self.close();
            }
            return;
        }
        let root = match update.target {
            Model::Reference => &mut self.reference,
            Model::Running => &mut self.running,
            Model::Store => &mut self.store,
        };
        *root = Self::apply_mutation(root, update.mutation, self.clock.as_ref(), self.job_id);
    }

    fn apply_mutation(
        root: &EntityHolder,
        mutation: Mutation,
        clock: &dyn Clock,
        job_id: JobId,
    ) -> EntityHolder {
        match mutation {
            Mutation::PutJob(job) => root.with_entity(Entity::Job(job)),
            Mutation::PutTask(task) => {
                let existing = root.find_by_id(&task.id.to_string()).and_then(|h| h.task());
                if let Some(current) = existing {
                    if task.status.state.rank() < current.status.state.rank() {
                        warn!(
                            job_id = %job_id,
                            task_id = %task.id,
                            from = %current.status.state,
                            to = %task.status.state,
                            "Skipping backwards task update"
                        );
                        return root.clone();
                    }
                }
                root.with_child(EntityHolder::from_task(task))
            }
            Mutation::RemoveTask(id) => root.without_child(&id),
            Mutation::RemoveJob => root.clone(),
            Mutation::RecordActionFailure {
                tag,
                initial_delay_ms,
                max_delay_ms,
            } => {
                let previous = match root.tag(&tag) {
                    Some(TagValue::Retry(t)) => Some(t),
                    _ => None,
                };
                let next = next_retry_tag(previous, initial_delay_ms, max_delay_ms, clock.now_ms());
                root.with_tag(tag, TagValue::Retry(next))
            }
            Mutation::ClearActionFailures { tag } => root.without_tag(&tag),
            Mutation::ConsumeRateLimitToken { tag, bucket } => {
                let previous = match root.tag(&tag) {
                    Some(TagValue::RateLimiter(t)) => Some(t),
                    _ => None,
                };
                let mut refilled = bucket.refill(previous, clock.now_ms());
                refilled.tokens = refilled.tokens.saturating_sub(1);
                root.with_tag(tag, TagValue::RateLimiter(refilled))
            }
        }
    }

    /// Advances the reference job state from its tasks.
    ///
    /// A batch job finishes once every index holds a terminal task with no
    /// retry left; a terminating job finishes once every task is terminal.
    /// Service jobs only finish through a kill.
    fn evaluate_job_completion(&mut self) {
        let Some(job) = self.reference.job() else {
            return;
        };
        if job.is_finished() {
            return;
        }

        let done = match job.status.state {
            JobState::KillInitiated => self
                .reference
                .children()
                .all(|c| c.task().map(Task::is_finished).unwrap_or(true)),
            JobState::Accepted => match job.descriptor.ext {
                JobExt::Batch { size } => self.batch_work_complete(size),
                JobExt::Service { .. } => false,
            },
            JobState::Finished => false,
        };

        if done {
            match job.with_state(JobState::Finished, None, self.clock.now_ms()) {
                Ok(finished) => {
                    info!(job_id = %self.job_id, "Job completed");
                    self.replace_job(finished);
                }
                Err(err) => {
                    warn!(job_id = %self.job_id, error = %err, "Completion transition rejected");
                }
            }
        }
    }

    fn batch_work_complete(&self, size: u32) -> bool {
        if size == 0 {
            return false;
        }
        let Some(view) = BatchJobView::new(&self.reference) else {
            return false;
        };
        (0..size).all(|index| {
            view.task_at_index(index)
                .map(|task| task.is_finished() && !armada_model::should_retry(view.job(), task))
                .unwrap_or(false)
        })
    }

    /// Swaps the job entity into the reference and running roots and
    /// notifies subscribers.
    fn replace_job(&mut self, job: Job) {
        self.reference = self.reference.with_entity(Entity::Job(job.clone()));
        self.running = self.running.with_entity(Entity::Job(job.clone()));
        let _ = self.events.send(JobManagerEvent::JobUpdated { job });
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            info!(job_id = %self.job_id, "Job archived and closed");
            let _ = self.events.send(JobManagerEvent::JobClosed {
                job_id: self.job_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_model::{JobDescriptor, RetryPolicy};

    use crate::clock::ManualClock;

    fn root() -> (EntityHolder, Task) {
        let job = Job::new(JobDescriptor::batch("encode", 1, RetryPolicy::Never), 0);
        let task = Task::new(job.id, 0, 10);
        let root = EntityHolder::from_job(job).with_child(EntityHolder::from_task(task.clone()));
        (root, task)
    }

    #[test]
    fn test_backwards_task_update_is_skipped() {
        let (root, task) = root();
        let clock = ManualClock::new(0);
        let job_id = task.job_id;

        let started = task.with_state(TaskState::Started, None, 20).unwrap();
        let advanced = ReconciliationEngine::apply_mutation(
            &root,
            Mutation::PutTask(started.clone()),
            &clock,
            job_id,
        );
        assert_eq!(
            advanced
                .find_by_id(&task.id.to_string())
                .and_then(|h| h.task())
                .map(|t| t.status.state),
            Some(TaskState::Started)
        );

        // A stale report must not rewind the model.
        let stale = ReconciliationEngine::apply_mutation(
            &advanced,
            Mutation::PutTask(task.clone()),
            &clock,
            job_id,
        );
        assert_eq!(
            stale
                .find_by_id(&task.id.to_string())
                .and_then(|h| h.task())
                .map(|t| t.status.state),
            Some(TaskState::Started)
        );
    }

    #[test]
    fn test_consume_token_composes_within_one_cycle() {
        let (root, _) = root();
        let clock = ManualClock::new(1_000);
        let job_id = root.job().unwrap().id;
        let bucket = crate::interceptor::TokenBucket {
            capacity: 3,
            refill_interval_ms: 100,
            refill_amount: 1,
        };

        let mut current = root;
        for _ in 0..2 {
            current = ReconciliationEngine::apply_mutation(
                &current,
                Mutation::ConsumeRateLimitToken {
                    tag: "rate_limiter.new_task".into(),
                    bucket,
                },
                &clock,
                job_id,
            );
        }
        match current.tag("rate_limiter.new_task") {
            Some(TagValue::RateLimiter(tag)) => assert_eq!(tag.tokens, 1),
            other => panic!("unexpected tag state: {other:?}"),
        }
    }

    #[test]
    fn test_record_failure_extends_backoff() {
        let (root, _) = root();
        let clock = ManualClock::new(1_000);
        let job_id = root.job().unwrap().id;
        let mutation = || Mutation::RecordActionFailure {
            tag: "retry.store_write".into(),
            initial_delay_ms: 500,
            max_delay_ms: 4_000,
        };

        let once = ReconciliationEngine::apply_mutation(&root, mutation(), &clock, job_id);
        clock.set(2_000);
        let twice = ReconciliationEngine::apply_mutation(&once, mutation(), &clock, job_id);
        match twice.tag("retry.store_write") {
            Some(TagValue::Retry(tag)) => {
                assert_eq!(tag.failures, 2);
                assert_eq!(tag.next_attempt_ms, 3_000);
            }
            other => panic!("unexpected tag state: {other:?}"),
        }

        let cleared = ReconciliationEngine::apply_mutation(
            &twice,
            Mutation::ClearActionFailures {
                tag: "retry.store_write".into(),
            },
            &clock,
            job_id,
        );
        assert!(cleared.tag("retry.store_write").is_none());
    }
}
