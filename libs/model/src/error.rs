//! Error types for model validation.

use thiserror::Error;

/// Errors that can occur when constructing or evolving model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A state machine was asked to move backward or out of a terminal state.
    ///
    /// This indicates a bug in the driving harness; callers log the offending
    /// update and skip it rather than failing the whole engine.
    #[error("invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// Service capacity violates `min <= desired <= max`.
    #[error("invalid service capacity: min={min}, desired={desired}, max={max}")]
    InvalidCapacity { min: u32, desired: u32, max: u32 },
}
