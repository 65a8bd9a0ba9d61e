//! Worker records.

use crate::{CoreError, TaskId, WorkerId, WorkerStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Host-supplied description of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub name: WorkerId,

    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl WorkerDescriptor {
    /// Create a descriptor with the given capabilities.
    pub fn new<I, S>(name: impl Into<WorkerId>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

/// A logical executor and its mutable scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub capabilities: BTreeSet<String>,
    pub status: WorkerStatus,

    /// Task this worker is executing right now.
    pub current_task: Option<TaskId>,

    /// Eligible to receive a redistributed task.
    pub can_help: bool,

    pub completed_tasks: Vec<TaskId>,
    pub failed_tasks: Vec<TaskId>,
    pub last_error: Option<String>,

    /// Non-terminal tasks attributed to this worker, with their cost.
    attributed: BTreeMap<TaskId, f64>,
}

impl Worker {
    /// Sum of estimated cost over the non-terminal tasks attributed here.
    pub fn workload(&self) -> f64 {
        self.attributed.values().sum()
    }

    /// Ids of the tasks attributed to this worker.
    pub fn attributed_tasks(&self) -> impl Iterator<Item = &TaskId> {
        self.attributed.keys()
    }

    /// Number of tasks attributed to this worker.
    pub fn attributed_count(&self) -> usize {
        self.attributed.len()
    }

    /// Check if the task is attributed to this worker.
    pub fn holds(&self, task: &TaskId) -> bool {
        self.attributed.contains_key(task)
    }

    /// Attributed tasks other than the one executing.
    pub fn reserved_tasks(&self) -> impl Iterator<Item = &TaskId> {
        self.attributed
            .keys()
            .filter(move |id| self.current_task.as_ref() != Some(*id))
    }

    /// Returns true if the worker can start a task right now.
    pub fn is_available(&self) -> bool {
        self.current_task.is_none() && self.status.can_accept_tasks()
    }

    pub(crate) fn attach(&mut self, task: TaskId, cost: f64) {
        self.attributed.insert(task, cost);
    }

    pub(crate) fn detach(&mut self, task: &TaskId) -> Option<f64> {
        self.attributed.remove(task)
    }
}

impl TryFrom<WorkerDescriptor> for Worker {
    type Error = CoreError;

    fn try_from(desc: WorkerDescriptor) -> Result<Self, Self::Error> {
        if desc.name.as_str().is_empty() {
            return Err(CoreError::InvalidInput("worker name must not be empty".into()));
        }

        Ok(Self {
            id: desc.name,
            capabilities: desc.capabilities.into_iter().collect(),
            status: WorkerStatus::Idle,
            current_task: None,
            can_help: true,
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            last_error: None,
            attributed: BTreeMap::new(),
        })
    }
}
