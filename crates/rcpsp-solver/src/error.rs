//! Error types for the scheduling algorithms.

use rcpsp_core::ScheduleError;
use thiserror::Error;

/// Fatal errors raised while running a scheduling algorithm.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error(transparent)]
    Core(#[from] ScheduleError),

    #[error("CP-SAT model has no feasible solution")]
    CpSatInfeasible,

    #[error("CP-SAT model is invalid: {0}")]
    CpSatModelInvalid(String),

    #[error("CP-SAT solver timed out without finding an incumbent solution")]
    CpSatTimeoutNoIncumbent,

    #[error("greedy hint for task '{task_id}' does not match the completion table: hinted {hinted_end}, table says {table_end}")]
    HintValidationFailed {
        task_id: String,
        hinted_end: String,
        table_end: String,
    },

    #[error("unknown sort strategy '{0}'")]
    UnknownStrategy(String),

    #[error("task '{0}' requires more than one resource, which the CP-SAT encoding does not support")]
    MultiResourceUnsupported(String),
}
