//! Task records and the descriptors hosts use to create them.

use crate::{CoreError, Priority, TaskId, TaskStatus, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Host-supplied description of a task, as read from a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,

    /// Category tag matched against worker capabilities.
    pub kind: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub priority: Priority,

    /// Estimated cost in seconds. Must be positive.
    pub estimated_cost: f64,

    #[serde(default)]
    pub dependencies: Vec<TaskId>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Reserve the task for this worker up front.
    #[serde(default)]
    pub worker: Option<WorkerId>,
}

impl TaskDescriptor {
    /// Create a descriptor with the required fields.
    pub fn new(id: impl Into<TaskId>, kind: impl Into<String>, estimated_cost: f64) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            description: String::new(),
            priority: Priority::default(),
            estimated_cost,
            dependencies: Vec::new(),
            labels: HashMap::new(),
            worker: None,
        }
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder method to add a dependency.
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Builder method to add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Builder method to reserve the task for a worker.
    pub fn pinned_to(mut self, worker: impl Into<WorkerId>) -> Self {
        self.worker = Some(worker.into());
        self
    }
}

/// A schedulable unit of work and its execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub description: String,
    pub priority: Priority,
    pub estimated_cost: f64,
    pub dependencies: Vec<TaskId>,
    pub labels: HashMap<String, String>,
    pub status: TaskStatus,

    /// Worker the task is currently (or was last) attributed to.
    pub assigned_worker: Option<WorkerId>,

    /// First worker the task was ever attributed to.
    pub first_worker: Option<WorkerId>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Error message if execution failed.
    pub error: Option<String>,
}

impl Task {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock execution time, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Record `worker` as the task's attribution.
    pub(crate) fn attribute_to(&mut self, worker: &WorkerId) {
        if self.first_worker.is_none() {
            self.first_worker = Some(worker.clone());
        }
        self.assigned_worker = Some(worker.clone());
    }

    /// Returns true if the final worker differs from the first one.
    pub fn was_redistributed(&self) -> bool {
        match (&self.first_worker, &self.assigned_worker) {
            (Some(first), Some(last)) => first != last,
            _ => false,
        }
    }
}

impl TryFrom<TaskDescriptor> for Task {
    type Error = CoreError;

    fn try_from(desc: TaskDescriptor) -> Result<Self, Self::Error> {
        if desc.id.as_str().is_empty() {
            return Err(CoreError::InvalidInput("task id must not be empty".into()));
        }
        if !desc.estimated_cost.is_finite() || desc.estimated_cost <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "task {} has non-positive estimated cost {}",
                desc.id, desc.estimated_cost
            )));
        }

        Ok(Self {
            id: desc.id,
            kind: desc.kind,
            description: desc.description,
            priority: desc.priority,
            estimated_cost: desc.estimated_cost,
            dependencies: desc.dependencies,
            labels: desc.labels,
            status: TaskStatus::Pending,
            assigned_worker: None,
            first_worker: None,
            started_at: None,
            finished_at: None,
            error: None,
        })
    }
}
