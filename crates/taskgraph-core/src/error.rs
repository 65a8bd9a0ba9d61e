//! Core domain errors.

use thiserror::Error;

use crate::{TaskId, TaskStatus, WorkerId};

/// Structural errors raised while building or mutating a run.
///
/// These are configuration problems: they surface at setup time and are
/// returned to the caller instead of being recorded on a task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A task with the same id was already added to the graph.
    #[error("Duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// A worker with the same name was already registered.
    #[error("Duplicate worker: {0}")]
    DuplicateWorker(WorkerId),

    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Worker not found.
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),

    /// The worker is busy or failed and cannot take the task.
    #[error("Worker {0} is not available")]
    WorkerUnavailable(WorkerId),

    /// Invalid state transition.
    #[error("Invalid state transition for task {task}: {from} -> {to}")]
    InvalidStateTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// One of the run bookkeeping invariants does not hold.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

/// Failure reported by (or on behalf of) the injected task executor.
///
/// Recorded on the task and the worker; never propagated out of the
/// scheduling loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskExecutionError {
    /// The executor returned an error.
    #[error("{0}")]
    Failed(String),

    /// The execution exceeded the configured per-task timeout.
    #[error("Timed out after {0} ms")]
    TimedOut(u64),

    /// The execution panicked.
    #[error("Execution panicked: {0}")]
    Panicked(String),
}

impl TaskExecutionError {
    /// Shorthand for [`TaskExecutionError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
