//! The job supervisor: one reconciliation engine per active job.
//!
//! The supervisor owns the engine map and the runtime event channel fed by
//! the placement and agent adapters. Each tick it drains pending events
//! into the owning engines, then runs one reconciliation cycle per job.
//! Engines are independent: a failing action in one job never stops the
//! cycle loop for the others, and a closed engine is simply dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use armada_id::JobId;
use armada_model::{Job, JobDescriptor, JobExt};
use armada_reconcile::resolver::{
    BatchDifferenceResolver, DifferenceResolver, ServiceDifferenceResolver,
};
use armada_reconcile::{
    AgentKillService, CapacityGroupService, Clock, JobStore, PlacementService,
    ReconcilerConfiguration, ReconciliationEngine, StoreError, TaskRuntimeEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapters::{SimulatedAgent, SimulatedPlacement};
use crate::config::Config;

pub struct JobSupervisor {
    reconcile_interval: Duration,
    reconciler: ReconcilerConfiguration,
    store: Arc<dyn JobStore>,
    placement: Arc<dyn PlacementService>,
    agent_kill: Arc<dyn AgentKillService>,
    capacity_groups: Arc<dyn CapacityGroupService>,
    clock: Arc<dyn Clock>,
    engines: HashMap<JobId, ReconciliationEngine>,
    events_rx: mpsc::UnboundedReceiver<TaskRuntimeEvent>,
}

impl JobSupervisor {
    pub fn new(
        config: &Config,
        store: Arc<dyn JobStore>,
        capacity_groups: Arc<dyn CapacityGroupService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let placement = Arc::new(SimulatedPlacement::new(events_tx.clone(), clock.clone()));
        let agent_kill = Arc::new(SimulatedAgent::new(events_tx, clock.clone()));

        Self {
            reconcile_interval: Duration::from_millis(config.reconcile_interval_ms),
            reconciler: config.reconciler.clone(),
            store,
            placement,
            agent_kill,
            capacity_groups,
            clock,
            engines: HashMap::new(),
            events_rx,
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.engines.len()
    }

    /// Persists a new job and starts reconciling it.
    pub async fn submit_job(&mut self, descriptor: JobDescriptor) -> Result<JobId, StoreError> {
        let job = Job::new(descriptor, self.clock.now_ms());
        self.store.put_job(&job).await?;

        let resolver: Box<dyn DifferenceResolver> = match job.descriptor.ext {
            JobExt::Batch { .. } => Box::new(BatchDifferenceResolver::new(
                self.reconciler.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.placement),
                Arc::clone(&self.agent_kill),
                Arc::clone(&self.capacity_groups),
                Arc::clone(&self.clock),
            )),
            JobExt::Service { .. } => Box::new(ServiceDifferenceResolver::new(
                self.reconciler.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.placement),
                Arc::clone(&self.agent_kill),
                Arc::clone(&self.capacity_groups),
                Arc::clone(&self.clock),
            )),
        };

        let job_id = job.id;
        let engine = ReconciliationEngine::new(job, resolver, Arc::clone(&self.clock));
        self.engines.insert(job_id, engine);
        info!(job_id = %job_id, active_jobs = self.engines.len(), "Job accepted");
        Ok(job_id)
    }

    /// Requests termination of an active job. Returns false for unknown or
    /// already-closed jobs.
    pub fn kill_job(&mut self, job_id: JobId) -> bool {
        match self.engines.get_mut(&job_id) {
            Some(engine) => {
                engine.kill_job();
                true
            }
            None => false,
        }
    }

    /// Runs until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_ms = self.reconcile_interval.as_millis() as u64,
            "Job supervisor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycles().await;
                }
                Some(event) = self.events_rx.recv() => {
                    self.dispatch_event(event);
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(active_jobs = self.engines.len(), "Job supervisor stopped");
    }

    /// Drains pending runtime events, then runs one cycle per active job.
    pub async fn run_cycles(&mut self) {
        self.drain_events();

        let mut closed = Vec::new();
        for (job_id, engine) in self.engines.iter_mut() {
            let outcome = engine.trigger_cycle().await;
            if outcome.actions_failed > 0 {
                warn!(
                    job_id = %job_id,
                    failed = outcome.actions_failed,
                    emitted = outcome.actions_emitted,
                    "Cycle completed with failed actions"
                );
            }
            if outcome.closed {
                closed.push(*job_id);
            }
        }

        for job_id in closed {
            self.engines.remove(&job_id);
            info!(job_id = %job_id, active_jobs = self.engines.len(), "Job closed");
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch_event(event);
        }
    }

    fn dispatch_event(&mut self, event: TaskRuntimeEvent) {
        let id = event.task_id.to_string();
        match self
            .engines
            .values_mut()
            .find(|engine| engine.reference().find_by_id(&id).is_some())
        {
            Some(engine) => engine.apply_task_event(&event),
            None => {
                debug!(task_id = %event.task_id, "Dropping event for unowned task");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_id::TaskId;
    use armada_model::{JobState, RetryPolicy, TaskState};
    use armada_reconcile::ManualClock;

    use crate::adapters::StaticCapacityGroups;
    use crate::store::InMemoryJobStore;

    fn test_config() -> Config {
        Config {
            log_level: "info".to_string(),
            dev_mode: false,
            reconcile_interval_ms: 10,
            reconciler: ReconcilerConfiguration::default(),
        }
    }

    fn supervisor() -> (JobSupervisor, Arc<InMemoryJobStore>) {
        let store = Arc::new(InMemoryJobStore::new());
        let supervisor = JobSupervisor::new(
            &test_config(),
            store.clone() as Arc<dyn JobStore>,
            Arc::new(StaticCapacityGroups::default()),
            Arc::new(ManualClock::new(1_000_000)),
        );
        (supervisor, store)
    }

    #[tokio::test]
    async fn test_batch_job_full_lifecycle_through_kill() {
        let (mut supervisor, store) = supervisor();
        let job_id = supervisor
            .submit_job(JobDescriptor::batch("encode", 2, RetryPolicy::Never))
            .await
            .unwrap();
        assert_eq!(supervisor.active_jobs(), 1);

        // Create, then start; placement reports the launches.
        supervisor.run_cycles().await;
        assert_eq!(store.list_tasks_for_job(job_id).await.unwrap().len(), 2);
        supervisor.run_cycles().await;

        assert!(supervisor.kill_job(job_id));
        // Kill propagation, completion, store sync, archive.
        for _ in 0..6 {
            supervisor.run_cycles().await;
            if supervisor.active_jobs() == 0 {
                break;
            }
        }

        assert_eq!(supervisor.active_jobs(), 0);
        assert!(store.get_job(job_id).await.unwrap_err().is_not_found());
        let archived = store.get_archived_job(job_id).await.unwrap();
        assert_eq!(archived.status.state, JobState::Finished);
        assert!(store.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_progress_independently() {
        let (mut supervisor, store) = supervisor();
        let first = supervisor
            .submit_job(JobDescriptor::batch("encode", 1, RetryPolicy::Never))
            .await
            .unwrap();
        let second = supervisor
            .submit_job(JobDescriptor::batch("render", 1, RetryPolicy::Never))
            .await
            .unwrap();

        supervisor.run_cycles().await;
        supervisor.run_cycles().await;

        for job_id in [first, second] {
            let tasks = store.list_tasks_for_job(job_id).await.unwrap();
            assert_eq!(tasks.len(), 1);
        }
        // Placement launches were routed to the right engines.
        supervisor.run_cycles().await;
        for engine in supervisor.engines.values() {
            let launched = engine
                .reference()
                .children()
                .filter_map(|c| c.task())
                .all(|t| t.status.state == TaskState::Launched);
            assert!(launched);
        }
    }

    #[tokio::test]
    async fn test_event_for_unknown_task_is_dropped() {
        let (mut supervisor, _store) = supervisor();
        supervisor
            .submit_job(JobDescriptor::batch("encode", 1, RetryPolicy::Never))
            .await
            .unwrap();

        supervisor.dispatch_event(TaskRuntimeEvent {
            task_id: TaskId::new(),
            state: TaskState::Finished,
            reason: Some("failed".to_string()),
            timestamp_ms: 0,
        });
        assert_eq!(supervisor.active_jobs(), 1);

        assert!(!supervisor.kill_job(armada_id::JobId::new()));
    }
}
