//! Status enums for tasks and workers, plus task priority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task priority, fixed at creation.
///
/// Variants are declared lowest first so the derived `Ord` ranks
/// `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.pad(s)
    }
}

/// Status of a task in the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for dependencies or for a worker.
    #[default]
    Pending,
    /// Derived view of a `Pending` task whose dependencies are all
    /// completed. Never stored on a task.
    Ready,
    /// Executing on its assigned worker.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Execution failed.
    Failed,
}

impl TaskStatus {
    /// Returns true if the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true while the task still counts as outstanding work.
    pub fn is_outstanding(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.pad(s)
    }
}

/// Status of a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// No task executing and nothing reserved.
    #[default]
    Idle,
    /// Executing its current task.
    Working,
    /// Not executing, but holding a task redistributed to it.
    Helping,
    /// Last execution failed; needs an explicit re-enable.
    Failed,
}

impl WorkerStatus {
    /// Returns true if the worker can start a task right now.
    pub fn can_accept_tasks(&self) -> bool {
        matches!(self, Self::Idle | Self::Helping)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Working => "WORKING",
            Self::Helping => "HELPING",
            Self::Failed => "FAILED",
        };
        f.pad(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::InProgress.is_outstanding());
    }

    #[test]
    fn test_worker_acceptance() {
        assert!(WorkerStatus::Idle.can_accept_tasks());
        assert!(WorkerStatus::Helping.can_accept_tasks());
        assert!(!WorkerStatus::Working.can_accept_tasks());
        assert!(!WorkerStatus::Failed.can_accept_tasks());
    }
}
