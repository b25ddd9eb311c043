//! Error types for the reactive engine.
//!
//! Most misuse of the engine is deliberately *not* an error: writes to a
//! read-only wrapper are logged and ignored, triggers on values nobody
//! observes are no-ops. The variants here cover the few operations that
//! can genuinely fail.

use thiserror::Error;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A primitive was supplied where a record or sequence is required.
    #[error("cannot observe a {kind} value: only records and sequences can be made reactive")]
    NotStructured {
        /// Name of the primitive kind that was supplied.
        kind: &'static str,
    },

    /// The job queue kept re-filling itself during a flush.
    ///
    /// This almost always means two batched effects write each other's
    /// dependencies.
    #[error("job queue still pending after {passes} flush passes")]
    FlushLimitExceeded {
        /// Number of passes performed before giving up.
        passes: usize,
    },

    /// A structured value contains itself and cannot be snapshotted.
    #[error("cyclic structure detected while serializing")]
    Cycle,

    /// `NaN` or an infinity cannot be represented in JSON.
    #[error("number {0} has no JSON representation")]
    NonFiniteNumber(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
