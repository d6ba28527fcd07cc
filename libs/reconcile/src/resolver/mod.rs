//! Difference resolvers.
//!
//! A resolver compares the reference, running, and store models for one job
//! and returns the ordered corrective actions that converge them. One
//! variant exists per job type; both share the helpers in [`support`].

mod batch;
mod service;
pub(crate) mod support;

pub use batch::BatchDifferenceResolver;
pub use service::ServiceDifferenceResolver;

use crate::action::ChangeAction;
use crate::holder::EntityHolder;

/// The pure reconciliation computation.
///
/// Called once per job per cycle; deterministic given the three models and
/// current interceptor state. Never fails for expected divergence — all
/// divergence is expressed as emitted actions.
pub trait DifferenceResolver: Send + Sync {
    fn resolve(
        &self,
        reference: &EntityHolder,
        running: &EntityHolder,
        store: &EntityHolder,
    ) -> Vec<Box<dyn ChangeAction>>;
}
