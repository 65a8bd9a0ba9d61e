//! Final run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskgraph_core::{RunId, StrandedTask, TaskId, TaskStatus, WorkerId, WorkerStatus};

use crate::state::Run;

/// A task that failed, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub worker: Option<WorkerId>,
    pub error: String,
}

/// Per-task timing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTiming {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub worker: Option<WorkerId>,
    pub first_worker: Option<WorkerId>,
    pub estimated_cost: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Per-worker totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker: WorkerId,
    pub status: WorkerStatus,
    pub completed: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

/// The run ended with pending work that could never start.
///
/// Diagnostic only: the run still produced a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockWarning {
    /// Tasks waiting on dependencies that did not complete.
    pub blocked: Vec<StrandedTask>,
    /// Ready tasks left over because no worker was available.
    pub unplaced: Vec<TaskId>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Wall-clock duration in seconds.
    pub duration_secs: f64,

    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub never_started: usize,

    /// Summed estimated cost of completed tasks, in seconds.
    pub estimated_secs: f64,

    /// `estimated / actual`; 0 for an instantaneous run.
    pub speedup: f64,

    /// `(estimated - actual) / actual`. Negative when the run took longer
    /// than its completed work was estimated to take.
    pub efficiency: f64,

    /// Completed tasks per second.
    pub throughput: f64,

    /// Tasks whose final worker differs from their first one.
    pub redistributions: usize,

    /// The run was stopped before it could drain.
    pub stopped: bool,

    pub failures: Vec<TaskFailure>,
    pub never_started_tasks: Vec<TaskId>,
    pub tasks: Vec<TaskTiming>,
    pub workers: Vec<WorkerSummary>,
    pub deadlock: Option<DeadlockWarning>,
}

impl RunReport {
    /// Summarize a run. Pure: reads the run, touches nothing else.
    pub fn generate(
        run: &Run,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        stopped: bool,
    ) -> Self {
        let duration_secs = (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let graph = &run.graph;
        let completed = graph.count_with_status(TaskStatus::Completed);
        let failed = graph.count_with_status(TaskStatus::Failed);

        let estimated_secs: f64 = graph
            .tasks()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.estimated_cost)
            .sum();

        let (speedup, efficiency, throughput) = if duration_secs > 0.0 {
            (
                estimated_secs / duration_secs,
                (estimated_secs - duration_secs) / duration_secs,
                completed as f64 / duration_secs,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        let failures = graph
            .tasks()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| TaskFailure {
                task_id: t.id.clone(),
                worker: t.assigned_worker.clone(),
                error: t.error.clone().unwrap_or_default(),
            })
            .collect();

        let never_started_tasks: Vec<TaskId> = graph
            .tasks()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect();

        let deadlock = if stopped || never_started_tasks.is_empty() {
            None
        } else {
            Some(DeadlockWarning {
                blocked: graph.stranded_tasks(),
                unplaced: graph.ready_tasks().into_iter().map(|t| t.id.clone()).collect(),
            })
        };

        let tasks = graph
            .tasks()
            .map(|t| TaskTiming {
                task_id: t.id.clone(),
                status: t.status,
                worker: t.assigned_worker.clone(),
                first_worker: t.first_worker.clone(),
                estimated_cost: t.estimated_cost,
                started_at: t.started_at,
                finished_at: t.finished_at,
                duration_ms: t.duration().map(|d| d.num_milliseconds()),
            })
            .collect();

        let workers = run
            .registry
            .workers()
            .map(|w| WorkerSummary {
                worker: w.id.clone(),
                status: w.status,
                completed: w.completed_tasks.len(),
                failed: w.failed_tasks.len(),
                last_error: w.last_error.clone(),
            })
            .collect();

        Self {
            run_id: run.id.clone(),
            started_at,
            finished_at,
            duration_secs,
            total_tasks: graph.len(),
            completed,
            failed,
            never_started: never_started_tasks.len(),
            estimated_secs,
            speedup,
            efficiency,
            throughput,
            redistributions: graph.tasks().filter(|t| t.was_redistributed()).count(),
            stopped,
            failures,
            never_started_tasks,
            tasks,
            workers,
            deadlock,
        }
    }

    /// Every task completed.
    pub fn is_success(&self) -> bool {
        self.completed == self.total_tasks
    }
}
