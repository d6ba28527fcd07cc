//! Immutable entity holder tree.
//!
//! An [`EntityHolder`] pairs one entity (job or task) with its children and
//! a set of tags carrying interceptor state. Holders are never mutated in
//! place: every update produces a new holder, and the engine swaps the new
//! root in atomically, so prior snapshots stay valid for concurrent readers.
//! Clones are cheap — entity, children, and tags are all `Arc`-shared.

use std::collections::BTreeMap;
use std::sync::Arc;

use armada_model::{Job, Task};

use crate::interceptor::{RetryTag, TokenBucketTag};

/// A job or a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Job(Job),
    Task(Task),
}

impl Entity {
    /// Canonical string id of the entity.
    pub fn id(&self) -> String {
        match self {
            Entity::Job(job) => job.id.to_string(),
            Entity::Task(task) => task.id.to_string(),
        }
    }
}

/// Interceptor state attached to a holder.
///
/// Tags are replaced atomically with the holder on each update; they are
/// never mutated concurrently in place.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Backoff state for a retry interceptor.
    Retry(RetryTag),
    /// Token bucket state for a rate limiter interceptor.
    RateLimiter(TokenBucketTag),
}

/// One node of the immutable snapshot tree: an entity plus a mapping from
/// child id to child holder. A job holder's children are its task holders.
#[derive(Debug, Clone)]
pub struct EntityHolder {
    entity: Arc<Entity>,
    children: Arc<BTreeMap<String, EntityHolder>>,
    tags: Arc<BTreeMap<String, TagValue>>,
}

impl EntityHolder {
    /// Builds a job root with no tasks.
    pub fn from_job(job: Job) -> Self {
        Self {
            entity: Arc::new(Entity::Job(job)),
            children: Arc::new(BTreeMap::new()),
            tags: Arc::new(BTreeMap::new()),
        }
    }

    /// Builds a leaf task holder.
    pub fn from_task(task: Task) -> Self {
        Self {
            entity: Arc::new(Entity::Task(task)),
            children: Arc::new(BTreeMap::new()),
            tags: Arc::new(BTreeMap::new()),
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn id(&self) -> String {
        self.entity.id()
    }

    /// The job entity, if this holder wraps a job.
    pub fn job(&self) -> Option<&Job> {
        match self.entity.as_ref() {
            Entity::Job(job) => Some(job),
            Entity::Task(_) => None,
        }
    }

    /// The task entity, if this holder wraps a task.
    pub fn task(&self) -> Option<&Task> {
        match self.entity.as_ref() {
            Entity::Task(task) => Some(task),
            Entity::Job(_) => None,
        }
    }

    /// All child holders, in child-id order.
    pub fn children(&self) -> impl Iterator<Item = &EntityHolder> {
        self.children.values()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Finds a direct child by entity id.
    pub fn find_by_id(&self, id: &str) -> Option<&EntityHolder> {
        self.children.get(id)
    }

    /// Returns a new holder with the entity replaced and children/tags kept.
    pub fn with_entity(&self, entity: Entity) -> Self {
        Self {
            entity: Arc::new(entity),
            children: Arc::clone(&self.children),
            tags: Arc::clone(&self.tags),
        }
    }

    /// Returns a new holder with `child` added or replaced, keyed by its id.
    pub fn with_child(&self, child: EntityHolder) -> Self {
        let mut children = (*self.children).clone();
        children.insert(child.id(), child);
        Self {
            entity: Arc::clone(&self.entity),
            children: Arc::new(children),
            tags: Arc::clone(&self.tags),
        }
    }

    /// Returns a new holder with the child at `id` removed. A miss is a
    /// no-op copy.
    pub fn without_child(&self, id: &str) -> Self {
        let mut children = (*self.children).clone();
        children.remove(id);
        Self {
            entity: Arc::clone(&self.entity),
            children: Arc::new(children),
            tags: Arc::clone(&self.tags),
        }
    }

    pub fn tag(&self, name: &str) -> Option<&TagValue> {
        self.tags.get(name)
    }

    /// Returns a new holder with the tag set.
    pub fn with_tag(&self, name: impl Into<String>, value: TagValue) -> Self {
        let mut tags = (*self.tags).clone();
        tags.insert(name.into(), value);
        Self {
            entity: Arc::clone(&self.entity),
            children: Arc::clone(&self.children),
            tags: Arc::new(tags),
        }
    }

    /// Returns a new holder with the tag removed.
    pub fn without_tag(&self, name: &str) -> Self {
        let mut tags = (*self.tags).clone();
        tags.remove(name);
        Self {
            entity: Arc::clone(&self.entity),
            children: Arc::clone(&self.children),
            tags: Arc::new(tags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_model::{JobDescriptor, RetryPolicy};

    fn job_root() -> EntityHolder {
        EntityHolder::from_job(Job::new(
            JobDescriptor::batch("render", 2, RetryPolicy::Never),
            0,
        ))
    }

    #[test]
    fn test_updates_preserve_prior_snapshot() {
        let root = job_root();
        let job_id = root.job().unwrap().id;
        let task = Task::new(job_id, 0, 10);
        let task_id = task.id.to_string();

        let updated = root.with_child(EntityHolder::from_task(task));

        // The original snapshot is untouched.
        assert_eq!(root.child_count(), 0);
        assert_eq!(updated.child_count(), 1);
        assert!(updated.find_by_id(&task_id).is_some());
    }

    #[test]
    fn test_child_replacement_keyed_by_id() {
        let root = job_root();
        let job_id = root.job().unwrap().id;
        let task = Task::new(job_id, 0, 10);
        let with_task = root.with_child(EntityHolder::from_task(task.clone()));

        let moved = task
            .with_state(armada_model::TaskState::Launched, None, 20)
            .unwrap();
        let updated = with_task.with_child(EntityHolder::from_task(moved));

        assert_eq!(updated.child_count(), 1);
        let held = updated.find_by_id(&task.id.to_string()).unwrap();
        assert_eq!(
            held.task().unwrap().status.state,
            armada_model::TaskState::Launched
        );
    }

    #[test]
    fn test_tags_ride_holder_updates() {
        let root = job_root().with_tag(
            "retry.store_write",
            TagValue::Retry(RetryTag {
                failures: 1,
                next_attempt_ms: 500,
            }),
        );
        assert!(root.tag("retry.store_write").is_some());

        let cleared = root.without_tag("retry.store_write");
        assert!(cleared.tag("retry.store_write").is_none());
        // Original still carries it.
        assert!(root.tag("retry.store_write").is_some());
    }
}
