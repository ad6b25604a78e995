//! Error types for the scheduling core.

use thiserror::Error;

/// Fatal errors raised while validating input or building a schedulable model.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("cycle detected among tasks: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("unschedulable tasks remain with no further events to advance to: {0:?}")]
    UnschedulableResidue(Vec<String>),

    #[error("invalid lock file: {0}")]
    InvalidLockFile(String),

    #[error("invalid task '{id}': {reason}")]
    InvalidTask { id: String, reason: String },
}
