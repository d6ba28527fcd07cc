//! Armada orchestrator service.
//!
//! Wires the reconciliation core to its collaborators: an in-memory job
//! store, simulated placement and agent adapters, and the supervisor that
//! drives one reconciliation engine per active job.

pub mod adapters;
pub mod config;
pub mod store;
pub mod supervisor;
