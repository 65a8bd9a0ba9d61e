//! Run state shared by the control loop and the rebalancer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Notify};
use tracing::debug;

use taskgraph_core::{
    CapabilityMatcher, CoreError, RunId, SchedulerEvent, Task, TaskDescriptor, TaskExecutionError,
    TaskGraph, TaskId, TaskStatus, Worker, WorkerDescriptor, WorkerId, WorkerRegistry,
};

/// One scheduling session: the task graph and the worker pool.
///
/// Every operation that touches both halves lives here so a caller holding
/// the run (behind [`RunState::run`]) mutates them together.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub graph: TaskGraph,
    pub registry: WorkerRegistry,
}

impl Run {
    /// Build a run from descriptors.
    ///
    /// Workers are registered first so that tasks pinned to a worker can be
    /// reserved for it. Fails on duplicate ids, unknown pinned workers and
    /// invalid costs.
    pub fn new(
        tasks: impl IntoIterator<Item = TaskDescriptor>,
        workers: impl IntoIterator<Item = WorkerDescriptor>,
    ) -> Result<Self, CoreError> {
        let mut registry = WorkerRegistry::new();
        for desc in workers {
            registry.register(Worker::try_from(desc)?)?;
        }

        let mut graph = TaskGraph::new();
        let mut pins = Vec::new();
        for desc in tasks {
            let pin = desc.worker.clone();
            let task = Task::try_from(desc)?;
            if let Some(worker) = pin {
                registry.get(&worker)?;
                pins.push((task.id.clone(), worker));
            }
            graph.add_task(task)?;
        }

        for (task_id, worker) in pins {
            registry.reserve(&worker, graph.task(&task_id)?)?;
            graph.attribute(&task_id, &worker)?;
        }

        Ok(Self {
            id: RunId::generate(),
            graph,
            registry,
        })
    }

    /// Next (task, worker) pair to launch, if any.
    ///
    /// Walks ready tasks in priority order. A task reserved for a worker
    /// waits for that worker; an unreserved one goes to the best free match.
    pub fn next_launch(&self, matcher: &dyn CapabilityMatcher) -> Option<(TaskId, WorkerId)> {
        for task in self.graph.ready_tasks() {
            match self.registry.holder_of(&task.id) {
                Some(holder) => {
                    if self.registry.get(holder).is_ok_and(|w| w.is_available()) {
                        return Some((task.id.clone(), holder.clone()));
                    }
                }
                None => {
                    if let Some(worker) = self.registry.best_worker_for(task, matcher) {
                        return Some((task.id.clone(), worker));
                    }
                }
            }
        }
        None
    }

    /// Start `task` on `worker`; returns snapshots for the executor.
    pub fn dispatch(
        &mut self,
        task: &TaskId,
        worker: &WorkerId,
    ) -> Result<(Task, Worker), CoreError> {
        if !self.graph.is_ready(task) {
            let current = self.graph.task(task)?;
            return Err(CoreError::InvalidStateTransition {
                task: task.clone(),
                from: current.status,
                to: TaskStatus::InProgress,
            });
        }
        if let Some(holder) = self.registry.holder_of(task) {
            if holder != worker {
                return Err(CoreError::InvariantViolation(format!(
                    "task {} is reserved for {}, not {}",
                    task, holder, worker
                )));
            }
        }

        self.registry.assign(worker, self.graph.task(task)?)?;
        self.graph.mark_in_progress(task, worker)?;

        Ok((self.graph.task(task)?.clone(), self.registry.get(worker)?.clone()))
    }

    /// Record the outcome of an execution.
    ///
    /// Returns the reservations released because the worker failed.
    pub fn settle(
        &mut self,
        task: &TaskId,
        worker: &WorkerId,
        outcome: &Result<(), TaskExecutionError>,
    ) -> Result<Vec<TaskId>, CoreError> {
        if self.registry.get(worker)?.current_task.as_ref() != Some(task) {
            return Err(CoreError::InvariantViolation(format!(
                "worker {} is not executing task {}",
                worker, task
            )));
        }

        match outcome {
            Ok(()) => self.graph.mark_completed(task)?,
            Err(err) => self.graph.mark_failed(task, err.to_string())?,
        }

        let released = self.registry.release(worker, task, outcome.as_ref().map(|_| ()))?;
        for id in &released {
            self.graph.clear_attribution(id)?;
        }
        Ok(released)
    }

    /// Move a reserved, not yet started task between workers.
    pub fn migrate(
        &mut self,
        task: &TaskId,
        from: &WorkerId,
        to: &WorkerId,
    ) -> Result<(), CoreError> {
        let current = self.graph.task(task)?;
        if current.status != TaskStatus::Pending {
            return Err(CoreError::InvalidStateTransition {
                task: task.clone(),
                from: current.status,
                to: TaskStatus::Pending,
            });
        }

        self.registry.transfer(task, from, to)?;
        self.graph.attribute(task, to)?;
        debug!(task_id = %task, from = %from, to = %to, "Task migrated");
        Ok(())
    }

    /// Bring a failed worker back.
    pub fn reenable(&mut self, worker: &WorkerId) -> Result<(), CoreError> {
        self.registry.reenable(worker)
    }

    /// Verify the cross-structure bookkeeping:
    /// - each task is attributed to at most one worker, and that worker is
    ///   the task's `assigned_worker`;
    /// - attributed tasks are non-terminal;
    /// - an executing task is its worker's current task;
    /// - workload equals the summed cost of attributed tasks.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        self.registry.check_invariants()?;

        let mut holders: HashMap<&TaskId, &WorkerId> = HashMap::new();
        for worker in self.registry.workers() {
            let mut expected = 0.0;
            for id in worker.attributed_tasks() {
                if let Some(other) = holders.insert(id, &worker.id) {
                    return Err(CoreError::InvariantViolation(format!(
                        "task {} attributed to both {} and {}",
                        id, other, worker.id
                    )));
                }
                let task = self.graph.task(id)?;
                if task.is_terminal() {
                    return Err(CoreError::InvariantViolation(format!(
                        "terminal task {} still attributed to {}",
                        id, worker.id
                    )));
                }
                if task.assigned_worker.as_ref() != Some(&worker.id) {
                    return Err(CoreError::InvariantViolation(format!(
                        "task {} held by {} but assigned to {:?}",
                        id, worker.id, task.assigned_worker
                    )));
                }
                expected += task.estimated_cost;
            }
            if (worker.workload() - expected).abs() > 1e-9 {
                return Err(CoreError::InvariantViolation(format!(
                    "worker {} workload {} != {}",
                    worker.id,
                    worker.workload(),
                    expected
                )));
            }
        }

        for task in self.graph.tasks() {
            if task.status == TaskStatus::InProgress {
                let executing = task
                    .assigned_worker
                    .as_ref()
                    .and_then(|w| self.registry.get(w).ok())
                    .is_some_and(|w| w.current_task.as_ref() == Some(&task.id));
                if !executing {
                    return Err(CoreError::InvariantViolation(format!(
                        "task {} in progress without an executing worker",
                        task.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Shared handle to a run in progress.
///
/// The mutex is the single serialization point for task and worker
/// mutations; it is never held across an execution.
pub struct RunState {
    pub run_id: RunId,
    pub run: Mutex<Run>,
    events: broadcast::Sender<SchedulerEvent>,
    /// Wakes the control loop when something other than a completion may
    /// have made a launch possible.
    wakeup: Notify,
}

impl RunState {
    /// Create a new RunState wrapped in Arc.
    pub fn new(run: Run, event_capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Arc::new(Self {
            run_id: run.id.clone(),
            run: Mutex::new(run),
            events,
            wakeup: Notify::new(),
        })
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn publish(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn wake(&self) {
        self.wakeup.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wakeup.notified().await;
    }

    /// Clone of the current run.
    pub async fn snapshot(&self) -> Run {
        self.run.lock().await.clone()
    }
}
