//! # armada-model
//!
//! Job and task data model for the Armada orchestrator.
//!
//! ## Design Principles
//!
//! - Model types are immutable value objects; every change produces a new value
//! - State machines move forward only (a transition never decreases rank)
//! - Timestamps are epoch milliseconds and always come from an injected clock,
//!   never from the model layer itself
//! - A retried task is a *new* task: same job and index, fresh id, incremented
//!   resubmit number
//!
//! The reconciliation core (`armada-reconcile`) consumes these types; the
//! store, placement, and agent layers exchange them at their trait seams.

mod capacity;
mod error;
mod job;
mod retry;
mod task;

pub use capacity::*;
pub use error::ModelError;
pub use job::*;
pub use retry::*;
pub use task::*;
