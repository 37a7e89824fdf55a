pub mod controller;
pub mod driver;
pub mod state;

pub use controller::{ApprovalResolution, TaskLoopController, DEFAULT_MAX_ITERATIONS};
pub use driver::{step, IterationDriver, IterationReport, StepOutcome};
pub use state::{CompletionStrategy, TaskState, TaskStatus};

use crate::approval::ApprovalError;
use crate::shared::errors::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum TaskLoopError {
    #[error("task prompt must be non-empty")]
    InvalidPrompt,
    #[error("max iterations must be at least 1")]
    InvalidMaxIterations,
    #[error("promise completion strategy requires a completion promise")]
    MissingCompletionPromise,
    #[error("task `{task_id}` is already active")]
    TaskAlreadyActive { task_id: String },
    #[error("task `{task_id}` not found")]
    NotFound { task_id: String },
    #[error("task `{task_id}` is waiting on approval `{approval_id}`")]
    ApprovalPending {
        task_id: String,
        approval_id: String,
    },
    #[error("task `{task_id}` cannot {operation} while {status}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        operation: String,
    },
    #[error("task `{task_id}` exceeded max iterations ({max_iterations})")]
    MaxIterationsExceeded { task_id: String, max_iterations: u32 },
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
