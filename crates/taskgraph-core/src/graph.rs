//! The dependency graph: canonical task set and readiness queries.
//!
//! Status transitions are driven from outside (by the scheduler). The graph
//! never re-evaluates dependents on its own; a dependent shows up in
//! [`TaskGraph::ready_tasks`] the next time it is queried.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{CoreError, Task, TaskId, TaskStatus, WorkerId};

/// A dependency that is keeping a task from becoming ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmetDependency {
    pub task_id: TaskId,
    /// Status of the dependency; `None` when no such task exists.
    pub status: Option<TaskStatus>,
}

/// A `Pending` task and the dependencies blocking it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandedTask {
    pub task_id: TaskId,
    pub unmet: Vec<UnmetDependency>,
}

/// Owns all tasks of a run.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
    /// Insertion order, for stable iteration.
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Fails if the id is already present.
    pub fn add_task(&mut self, task: Task) -> Result<(), CoreError> {
        if self.tasks.contains_key(&task.id) {
            return Err(CoreError::DuplicateTask(task.id));
        }
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Look up a task, failing with `TaskNotFound`.
    pub fn task(&self, id: &TaskId) -> Result<&Task, CoreError> {
        self.tasks
            .get(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.clone()))
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task, CoreError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.clone()))
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// True iff the task is `Pending` and every dependency is `Completed`.
    pub fn is_ready(&self, id: &TaskId) -> bool {
        let Some(task) = self.tasks.get(id) else {
            return false;
        };
        task.status == TaskStatus::Pending
            && task.dependencies.iter().all(|dep| {
                self.tasks
                    .get(dep)
                    .is_some_and(|d| d.status == TaskStatus::Completed)
            })
    }

    /// Status as seen from outside: ready pending tasks show as `Ready`.
    pub fn status_view(&self, id: &TaskId) -> Option<TaskStatus> {
        let task = self.tasks.get(id)?;
        if self.is_ready(id) {
            Some(TaskStatus::Ready)
        } else {
            Some(task.status)
        }
    }

    /// Ready tasks, highest priority first, then cheapest first.
    ///
    /// Remaining ties are broken by id so selection is deterministic.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks()
            .filter(|task| self.is_ready(&task.id))
            .collect();

        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.estimated_cost.total_cmp(&b.estimated_cost))
                .then_with(|| a.id.cmp(&b.id))
        });
        ready
    }

    /// True if any task is still pending or executing.
    pub fn has_outstanding_work(&self) -> bool {
        self.tasks.values().any(|t| t.status.is_outstanding())
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Record `worker` as the attribution of a pending task.
    pub fn attribute(&mut self, id: &TaskId, worker: &WorkerId) -> Result<(), CoreError> {
        let task = self.task_mut(id)?;
        if task.status != TaskStatus::Pending {
            return Err(CoreError::InvalidStateTransition {
                task: id.clone(),
                from: task.status,
                to: TaskStatus::Pending,
            });
        }
        task.attribute_to(worker);
        Ok(())
    }

    /// Drop the attribution of a pending task (its worker went away).
    pub fn clear_attribution(&mut self, id: &TaskId) -> Result<(), CoreError> {
        let task = self.task_mut(id)?;
        if task.status == TaskStatus::Pending {
            task.assigned_worker = None;
        }
        Ok(())
    }

    /// `Pending -> InProgress` on `worker`. The task must be ready.
    pub fn mark_in_progress(&mut self, id: &TaskId, worker: &WorkerId) -> Result<(), CoreError> {
        if !self.is_ready(id) {
            let task = self.task(id)?;
            return Err(CoreError::InvalidStateTransition {
                task: id.clone(),
                from: task.status,
                to: TaskStatus::InProgress,
            });
        }

        let task = self.task_mut(id)?;
        task.attribute_to(worker);
        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        Ok(())
    }

    /// `InProgress -> Completed`.
    pub fn mark_completed(&mut self, id: &TaskId) -> Result<(), CoreError> {
        let task = self.finish(id, TaskStatus::Completed)?;
        task.error = None;
        Ok(())
    }

    /// `InProgress -> Failed`, recording the error.
    pub fn mark_failed(&mut self, id: &TaskId, error: impl Into<String>) -> Result<(), CoreError> {
        let task = self.finish(id, TaskStatus::Failed)?;
        task.error = Some(error.into());
        Ok(())
    }

    fn finish(&mut self, id: &TaskId, to: TaskStatus) -> Result<&mut Task, CoreError> {
        let task = self.task_mut(id)?;
        if task.status != TaskStatus::InProgress {
            return Err(CoreError::InvalidStateTransition {
                task: id.clone(),
                from: task.status,
                to,
            });
        }
        task.status = to;
        task.finished_at = Some(Utc::now());
        Ok(task)
    }

    /// Pending tasks that are not ready, with what blocks each of them.
    pub fn stranded_tasks(&self) -> Vec<StrandedTask> {
        self.tasks()
            .filter(|t| t.status == TaskStatus::Pending && !self.is_ready(&t.id))
            .map(|t| StrandedTask {
                task_id: t.id.clone(),
                unmet: t
                    .dependencies
                    .iter()
                    .filter_map(|dep| match self.tasks.get(dep) {
                        Some(d) if d.status == TaskStatus::Completed => None,
                        Some(d) => Some(UnmetDependency {
                            task_id: dep.clone(),
                            status: Some(d.status),
                        }),
                        None => Some(UnmetDependency {
                            task_id: dep.clone(),
                            status: None,
                        }),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Tasks that could never run even if every execution succeeded:
    /// members of a dependency cycle, tasks depending on unknown ids, and
    /// everything downstream of those.
    pub fn unreachable_tasks(&self) -> Vec<TaskId> {
        let mut remaining: HashMap<&TaskId, usize> = HashMap::new();
        let mut dependents: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
        let mut queue = VecDeque::new();

        for task in self.tasks() {
            let deps: HashSet<&TaskId> = task.dependencies.iter().collect();
            remaining.insert(&task.id, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(&task.id);
            }
            if task.dependencies.is_empty() {
                queue.push_back(&task.id);
            }
        }

        let mut reachable: HashSet<&TaskId> = HashSet::new();
        while let Some(id) = queue.pop_front() {
            reachable.insert(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        self.order
            .iter()
            .filter(|id| !reachable.contains(id))
            .cloned()
            .collect()
    }
}
