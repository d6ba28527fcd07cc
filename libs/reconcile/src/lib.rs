//! # armada-reconcile
//!
//! The reconciliation core of the Armada orchestrator: for each job it
//! compares three views of state and computes the minimal ordered set of
//! corrective actions needed to converge them.
//!
//! - **Reference model**: desired job-and-task state, driven by the API.
//! - **Running model**: state believed true from placement/agent observation.
//! - **Store model**: last known durably persisted state.
//!
//! # Invariants
//!
//! - The resolver is a pure computation: deterministic given its three
//!   inputs and current interceptor state, no I/O, no blocking
//! - Holder trees are immutable; updates swap in a new root, so concurrent
//!   readers never observe a partially-applied change
//! - Models only ever advance; repeated resolution converges monotonically
//!   toward `reference == running == store`
//! - One job's failure never propagates to another job's cycle
//!
//! Change actions returned by a resolver perform their external calls when
//! the engine executes them; their effects feed back as model updates
//! observed on the next cycle.

pub mod action;
mod clock;
mod config;
mod engine;
mod external;
mod holder;
mod interceptor;
pub mod resolver;
mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ReconcilerConfiguration;
pub use engine::{CycleOutcome, JobManagerEvent, ReconciliationEngine, TaskRuntimeEvent};
pub use external::{
    AgentKillService, CapacityGroupService, KillError, PlacementError, PlacementService, JobStore,
    StoreError, StoreErrorCode,
};
pub use holder::{Entity, EntityHolder, TagValue};
pub use interceptor::{
    RateLimiterInterceptor, RetryActionInterceptor, RetryTag, TokenBucket, TokenBucketTag,
};
pub use view::{BatchJobView, JobView, ServiceJobView};
