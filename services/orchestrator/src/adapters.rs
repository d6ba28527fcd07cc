//! Simulated placement and agent adapters.
//!
//! Real deployments put the bin-packing scheduler and the agent wire
//! protocol behind these seams. The simulated versions accept every request
//! and report the resulting task transitions back through the runtime event
//! channel, which is enough to drive full job lifecycles in development
//! mode and in tests.

use std::collections::HashMap;
use std::sync::Arc;

use armada_id::TaskId;
use armada_model::{CapacityGroup, Job, Task, TaskState};
use armada_reconcile::{
    AgentKillService, CapacityGroupService, Clock, KillError, PlacementError, PlacementService,
    TaskRuntimeEvent,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Placement that accepts every request and immediately reports the task
/// as launched.
pub struct SimulatedPlacement {
    events: mpsc::UnboundedSender<TaskRuntimeEvent>,
    clock: Arc<dyn Clock>,
}

impl SimulatedPlacement {
    pub fn new(events: mpsc::UnboundedSender<TaskRuntimeEvent>, clock: Arc<dyn Clock>) -> Self {
        Self { events, clock }
    }
}

#[async_trait]
impl PlacementService for SimulatedPlacement {
    async fn request_placement(
        &self,
        _job: &Job,
        task: &Task,
        group: &CapacityGroup,
    ) -> Result<(), PlacementError> {
        debug!(task_id = %task.id, capacity_group = %group.name, "Simulated placement accepted");
        let event = TaskRuntimeEvent {
            task_id: task.id,
            state: TaskState::Launched,
            reason: None,
            timestamp_ms: self.clock.now_ms(),
        };
        self.events
            .send(event)
            .map_err(|_| PlacementError::Unavailable("event channel closed".to_string()))?;
        Ok(())
    }
}

/// Agent that acknowledges every kill and reports the task finished with
/// the kill reason.
pub struct SimulatedAgent {
    events: mpsc::UnboundedSender<TaskRuntimeEvent>,
    clock: Arc<dyn Clock>,
}

impl SimulatedAgent {
    pub fn new(events: mpsc::UnboundedSender<TaskRuntimeEvent>, clock: Arc<dyn Clock>) -> Self {
        Self { events, clock }
    }
}

#[async_trait]
impl AgentKillService for SimulatedAgent {
    async fn kill_task(&self, task_id: TaskId, reason: &str) -> Result<(), KillError> {
        debug!(task_id = %task_id, reason, "Simulated agent kill");
        let event = TaskRuntimeEvent {
            task_id,
            state: TaskState::Finished,
            reason: Some(reason.to_string()),
            timestamp_ms: self.clock.now_ms(),
        };
        self.events.send(event).map_err(|_| KillError {
            task_id,
            message: "event channel closed".to_string(),
        })?;
        Ok(())
    }
}

/// Capacity groups loaded once at startup; lookups never touch config
/// sources at resolve time.
#[derive(Default)]
pub struct StaticCapacityGroups {
    groups: HashMap<String, CapacityGroup>,
}

impl StaticCapacityGroups {
    pub fn new(groups: impl IntoIterator<Item = CapacityGroup>) -> Self {
        Self {
            groups: groups.into_iter().map(|g| (g.name.clone(), g)).collect(),
        }
    }
}

impl CapacityGroupService for StaticCapacityGroups {
    fn capacity_group(&self, name: &str) -> Option<CapacityGroup> {
        self.groups.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_reconcile::ManualClock;

    #[test]
    fn test_unknown_group_falls_back_to_default() {
        let groups = StaticCapacityGroups::new([CapacityGroup {
            name: "gpu".to_string(),
            ..CapacityGroup::default()
        }]);
        assert_eq!(groups.resolve("gpu").name, "gpu");
        assert_eq!(groups.resolve("missing").name, CapacityGroup::default().name);
    }

    #[tokio::test]
    async fn test_simulated_agent_reports_kill_as_finished() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agent = SimulatedAgent::new(tx, Arc::new(ManualClock::new(42)));
        let task_id = TaskId::new();

        agent.kill_task(task_id, "killed").await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.task_id, task_id);
        assert_eq!(event.state, TaskState::Finished);
        assert_eq!(event.reason.as_deref(), Some("killed"));
        assert_eq!(event.timestamp_ms, 42);
    }
}
