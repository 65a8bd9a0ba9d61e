//! Worker registry: worker state and assignment candidates.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::{
    CapabilityMatcher, CoreError, Task, TaskExecutionError, TaskId, Worker, WorkerId,
    WorkerStatus,
};

/// Owns all workers of a run.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, Worker>,
    /// Registration order, for stable iteration.
    order: Vec<WorkerId>,
}

fn by_workload(a: &&Worker, b: &&Worker) -> Ordering {
    a.workload()
        .total_cmp(&b.workload())
        .then_with(|| a.id.cmp(&b.id))
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Fails if the name is taken.
    pub fn register(&mut self, worker: Worker) -> Result<(), CoreError> {
        if self.workers.contains_key(&worker.id) {
            return Err(CoreError::DuplicateWorker(worker.id));
        }
        self.order.push(worker.id.clone());
        self.workers.insert(worker.id.clone(), worker);
        Ok(())
    }

    /// Look up a worker, failing with `UnknownWorker`.
    pub fn get(&self, id: &WorkerId) -> Result<&Worker, CoreError> {
        self.workers
            .get(id)
            .ok_or_else(|| CoreError::UnknownWorker(id.clone()))
    }

    fn get_mut(&mut self, id: &WorkerId) -> Result<&mut Worker, CoreError> {
        self.workers
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownWorker(id.clone()))
    }

    /// All workers in registration order.
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.order.iter().filter_map(|id| self.workers.get(id))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Worker a task is currently attributed to, if any.
    pub fn holder_of(&self, task: &TaskId) -> Option<&WorkerId> {
        self.workers().find(|w| w.holds(task)).map(|w| &w.id)
    }

    /// Workers that are idle or willing to help and not executing anything.
    pub fn idle_or_helping_workers(&self) -> Vec<&Worker> {
        self.workers()
            .filter(|w| w.current_task.is_none() && w.status != WorkerStatus::Failed)
            .filter(|w| w.status.can_accept_tasks() || w.can_help)
            .collect()
    }

    /// Pick the worker to run `task`.
    ///
    /// Capability matches win, lowest workload first. Without any match the
    /// lowest-workload idle or helping worker is used. `None` when nobody is
    /// free.
    pub fn best_worker_for(
        &self,
        task: &Task,
        matcher: &dyn CapabilityMatcher,
    ) -> Option<WorkerId> {
        let candidates = self.idle_or_helping_workers();

        candidates
            .iter()
            .copied()
            .filter(|w| matcher.matches(task, &w.capabilities))
            .min_by(by_workload)
            .or_else(|| candidates.iter().copied().min_by(by_workload))
            .map(|w| w.id.clone())
    }

    /// Start `task` on `worker`.
    pub fn assign(&mut self, worker: &WorkerId, task: &Task) -> Result<(), CoreError> {
        let w = self.get_mut(worker)?;
        if !w.is_available() {
            return Err(CoreError::WorkerUnavailable(worker.clone()));
        }

        if !w.holds(&task.id) {
            w.attach(task.id.clone(), task.estimated_cost);
        }
        w.status = WorkerStatus::Working;
        w.current_task = Some(task.id.clone());
        w.can_help = false;
        Ok(())
    }

    /// Finish `task` on `worker`.
    ///
    /// On success the worker goes back to `Idle` and can help again. On
    /// failure it becomes `Failed` and stays so until [`Self::reenable`];
    /// tasks it had reserved but not started are released and returned so
    /// the caller can hand them to someone else.
    pub fn release(
        &mut self,
        worker: &WorkerId,
        task: &TaskId,
        outcome: Result<(), &TaskExecutionError>,
    ) -> Result<Vec<TaskId>, CoreError> {
        let w = self.get_mut(worker)?;
        if w.current_task.as_ref() != Some(task) {
            return Err(CoreError::InvariantViolation(format!(
                "worker {} is not executing task {}",
                worker, task
            )));
        }

        w.detach(task);
        w.current_task = None;

        match outcome {
            Ok(()) => {
                w.completed_tasks.push(task.clone());
                w.status = WorkerStatus::Idle;
                w.can_help = true;
                Ok(Vec::new())
            }
            Err(err) => {
                w.failed_tasks.push(task.clone());
                w.status = WorkerStatus::Failed;
                w.last_error = Some(err.to_string());

                let reserved: Vec<TaskId> = w.reserved_tasks().cloned().collect();
                for id in &reserved {
                    self.unreserve(worker, id)?;
                }
                Ok(reserved)
            }
        }
    }

    /// Bring a failed worker back into rotation.
    pub fn reenable(&mut self, worker: &WorkerId) -> Result<(), CoreError> {
        let w = self.get_mut(worker)?;
        if w.status == WorkerStatus::Failed {
            w.status = WorkerStatus::Idle;
            w.can_help = true;
            w.last_error = None;
        }
        Ok(())
    }

    /// Attribute a not-yet-started task to `worker`.
    pub fn reserve(&mut self, worker: &WorkerId, task: &Task) -> Result<(), CoreError> {
        if let Some(holder) = self.holder_of(&task.id) {
            return Err(CoreError::InvariantViolation(format!(
                "task {} is already attributed to {}",
                task.id, holder
            )));
        }
        let w = self.get_mut(worker)?;
        w.attach(task.id.clone(), task.estimated_cost);
        Ok(())
    }

    /// Drop the attribution of a not-yet-started task; returns its cost.
    pub fn unreserve(&mut self, worker: &WorkerId, task: &TaskId) -> Result<f64, CoreError> {
        let w = self.get_mut(worker)?;
        if w.current_task.as_ref() == Some(task) {
            return Err(CoreError::InvariantViolation(format!(
                "task {} is executing on {}",
                task, worker
            )));
        }
        w.detach(task).ok_or_else(|| {
            CoreError::InvariantViolation(format!("task {} is not attributed to {}", task, worker))
        })
    }

    /// Move a reserved task from `from` to the helper `to`.
    ///
    /// The helper spends its availability: `can_help` drops to false and an
    /// idle helper becomes `Helping`.
    pub fn transfer(
        &mut self,
        task: &TaskId,
        from: &WorkerId,
        to: &WorkerId,
    ) -> Result<(), CoreError> {
        self.get(to)?;
        let cost = self.unreserve(from, task)?;

        let target = self.get_mut(to)?;
        target.attach(task.clone(), cost);
        target.can_help = false;
        if target.status == WorkerStatus::Idle {
            target.status = WorkerStatus::Helping;
        }
        Ok(())
    }

    /// Check per-worker bookkeeping.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        for w in self.workers() {
            if w.workload() < 0.0 {
                return Err(CoreError::InvariantViolation(format!(
                    "worker {} has negative workload",
                    w.id
                )));
            }
            match (&w.current_task, w.status) {
                (Some(task), WorkerStatus::Working) if w.holds(task) => {}
                (None, status) if status != WorkerStatus::Working => {}
                _ => {
                    return Err(CoreError::InvariantViolation(format!(
                        "worker {} is {} with current task {:?}",
                        w.id, w.status, w.current_task
                    )))
                }
            }
        }
        Ok(())
    }
}
