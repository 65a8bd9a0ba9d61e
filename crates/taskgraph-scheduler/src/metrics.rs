//! Prometheus metrics collection and formatting.
//!
//! This module renders run state in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use taskgraph_core::{TaskStatus, WorkerStatus};

use crate::state::{Run, RunState};

/// Lock the run and format its metrics as Prometheus text.
pub async fn collect_metrics(state: &Arc<RunState>) -> String {
    let run = state.run.lock().await;
    render_metrics(&run)
}

/// Format metrics for a run.
pub fn render_metrics(run: &Run) -> String {
    let mut output = String::new();

    write_worker_metrics(run, &mut output);
    write_task_metrics(run, &mut output);
    write_workload_metrics(run, &mut output);

    output
}

/// Worker counts by status.
fn write_worker_metrics(run: &Run, output: &mut String) {
    let mut idle = 0u64;
    let mut working = 0u64;
    let mut helping = 0u64;
    let mut failed = 0u64;

    for worker in run.registry.workers() {
        match worker.status {
            WorkerStatus::Idle => idle += 1,
            WorkerStatus::Working => working += 1,
            WorkerStatus::Helping => helping += 1,
            WorkerStatus::Failed => failed += 1,
        }
    }

    writeln!(output, "# HELP taskgraph_workers Number of workers by status").ok();
    writeln!(output, "# TYPE taskgraph_workers gauge").ok();
    writeln!(output, "taskgraph_workers{{status=\"idle\"}} {idle}").ok();
    writeln!(output, "taskgraph_workers{{status=\"working\"}} {working}").ok();
    writeln!(output, "taskgraph_workers{{status=\"helping\"}} {helping}").ok();
    writeln!(output, "taskgraph_workers{{status=\"failed\"}} {failed}").ok();
}

/// Task counts by status. Ready is reported separately from pending.
fn write_task_metrics(run: &Run, output: &mut String) {
    let mut pending = 0u64;
    let mut ready = 0u64;
    let mut in_progress = 0u64;
    let mut completed = 0u64;
    let mut failed = 0u64;

    for task in run.graph.tasks() {
        match run.graph.status_view(&task.id).unwrap_or(task.status) {
            TaskStatus::Pending => pending += 1,
            TaskStatus::Ready => ready += 1,
            TaskStatus::InProgress => in_progress += 1,
            TaskStatus::Completed => completed += 1,
            TaskStatus::Failed => failed += 1,
        }
    }

    writeln!(output).ok();
    writeln!(output, "# HELP taskgraph_tasks Number of tasks by status").ok();
    writeln!(output, "# TYPE taskgraph_tasks gauge").ok();
    writeln!(output, "taskgraph_tasks{{status=\"pending\"}} {pending}").ok();
    writeln!(output, "taskgraph_tasks{{status=\"ready\"}} {ready}").ok();
    writeln!(output, "taskgraph_tasks{{status=\"in_progress\"}} {in_progress}").ok();
    writeln!(output, "taskgraph_tasks{{status=\"completed\"}} {completed}").ok();
    writeln!(output, "taskgraph_tasks{{status=\"failed\"}} {failed}").ok();
}

/// Attributed workload per worker.
fn write_workload_metrics(run: &Run, output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskgraph_worker_workload Summed estimated cost attributed to a worker"
    )
    .ok();
    writeln!(output, "# TYPE taskgraph_worker_workload gauge").ok();
    for worker in run.registry.workers() {
        writeln!(
            output,
            "taskgraph_worker_workload{{worker=\"{}\"}} {}",
            worker.id,
            worker.workload()
        )
        .ok();
    }
}
