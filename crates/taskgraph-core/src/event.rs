//! Progress events published while a run executes.

use crate::ids::{RunId, TaskId, WorkerId};
use serde::{Deserialize, Serialize};

/// A progress notification for live displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerEvent {
    /// Run this event belongs to.
    pub run_id: RunId,
    /// What happened.
    pub kind: SchedulerEventKind,
    /// Unix timestamp (milliseconds) when the event occurred.
    pub timestamp_ms: i64,
}

/// Type of scheduler event, with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEventKind {
    TaskStarted {
        task_id: TaskId,
        worker: WorkerId,
    },
    TaskCompleted {
        task_id: TaskId,
        worker: WorkerId,
        duration_ms: i64,
    },
    TaskFailed {
        task_id: TaskId,
        worker: WorkerId,
        error: String,
    },
    /// A pending task moved from an overloaded worker to a helper.
    Rebalanced {
        task_id: TaskId,
        from: WorkerId,
        to: WorkerId,
    },
}

impl SchedulerEvent {
    /// Create a new event stamped with the current time.
    pub fn new(run_id: RunId, kind: SchedulerEventKind) -> Self {
        Self {
            run_id,
            kind,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(run_id: RunId, task_id: TaskId, worker: WorkerId) -> Self {
        Self::new(run_id, SchedulerEventKind::TaskStarted { task_id, worker })
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(
        run_id: RunId,
        task_id: TaskId,
        worker: WorkerId,
        duration_ms: i64,
    ) -> Self {
        Self::new(
            run_id,
            SchedulerEventKind::TaskCompleted {
                task_id,
                worker,
                duration_ms,
            },
        )
    }

    /// Create a TaskFailed event.
    pub fn task_failed(
        run_id: RunId,
        task_id: TaskId,
        worker: WorkerId,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            run_id,
            SchedulerEventKind::TaskFailed {
                task_id,
                worker,
                error: error.into(),
            },
        )
    }

    /// Create a Rebalanced event.
    pub fn rebalanced(run_id: RunId, task_id: TaskId, from: WorkerId, to: WorkerId) -> Self {
        Self::new(run_id, SchedulerEventKind::Rebalanced { task_id, from, to })
    }

    /// Task the event refers to.
    pub fn task_id(&self) -> &TaskId {
        match &self.kind {
            SchedulerEventKind::TaskStarted { task_id, .. }
            | SchedulerEventKind::TaskCompleted { task_id, .. }
            | SchedulerEventKind::TaskFailed { task_id, .. }
            | SchedulerEventKind::Rebalanced { task_id, .. } => task_id,
        }
    }
}
