//! Human-readable rendering of reports and events.

use std::fmt::Write;

use taskgraph_core::{SchedulerEvent, SchedulerEventKind};
use taskgraph_scheduler::RunReport;

/// Render a report as a text summary followed by per-task and per-worker
/// tables.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();

    writeln!(out, "Run {}", report.run_id).ok();
    writeln!(out, "  Duration:        {:.3}s", report.duration_secs).ok();
    writeln!(
        out,
        "  Tasks:           {} total, {} completed, {} failed, {} never started",
        report.total_tasks, report.completed, report.failed, report.never_started
    )
    .ok();
    writeln!(out, "  Estimated work:  {:.3}s", report.estimated_secs).ok();
    writeln!(out, "  Speedup:         {:.2}x", report.speedup).ok();
    writeln!(out, "  Efficiency:      {:+.1}%", report.efficiency * 100.0).ok();
    writeln!(out, "  Throughput:      {:.2} tasks/s", report.throughput).ok();
    writeln!(out, "  Redistributions: {}", report.redistributions).ok();
    if report.stopped {
        writeln!(out, "  Stopped early").ok();
    }

    writeln!(out).ok();
    writeln!(
        out,
        "{:<20}  {:<12}  {:<16}  {:>10}",
        "TASK", "STATUS", "WORKER", "DURATION"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(64)).ok();
    for task in &report.tasks {
        let worker = task
            .worker
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        let duration = task
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{:<20}  {:<12}  {:<16}  {:>10}",
            task.task_id, task.status, worker, duration
        )
        .ok();
    }

    writeln!(out).ok();
    writeln!(
        out,
        "{:<16}  {:<10}  {:>9}  {:>6}",
        "WORKER", "STATUS", "COMPLETED", "FAILED"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(48)).ok();
    for worker in &report.workers {
        writeln!(
            out,
            "{:<16}  {:<10}  {:>9}  {:>6}",
            worker.worker, worker.status, worker.completed, worker.failed
        )
        .ok();
    }

    if !report.failures.is_empty() {
        writeln!(out).ok();
        writeln!(out, "Failures:").ok();
        for failure in &report.failures {
            writeln!(out, "  - {}: {}", failure.task_id, failure.error).ok();
        }
    }

    if let Some(deadlock) = &report.deadlock {
        writeln!(out).ok();
        writeln!(out, "Warning: tasks left pending with no way forward").ok();
        for stranded in &deadlock.blocked {
            let unmet: Vec<String> = stranded
                .unmet
                .iter()
                .map(|dep| match dep.status {
                    Some(status) => format!("{} ({status})", dep.task_id),
                    None => format!("{} (unknown)", dep.task_id),
                })
                .collect();
            writeln!(out, "  - {} waits on {}", stranded.task_id, unmet.join(", ")).ok();
        }
        for task in &deadlock.unplaced {
            writeln!(out, "  - {task} is ready but no worker could take it").ok();
        }
    }

    out
}

/// One-line description of an event.
pub fn describe_event(event: &SchedulerEvent) -> String {
    match &event.kind {
        SchedulerEventKind::TaskStarted { task_id, worker } => {
            format!("{task_id} started on {worker}")
        }
        SchedulerEventKind::TaskCompleted {
            task_id,
            worker,
            duration_ms,
        } => format!("{task_id} completed on {worker} in {duration_ms}ms"),
        SchedulerEventKind::TaskFailed {
            task_id,
            worker,
            error,
        } => format!("{task_id} failed on {worker}: {error}"),
        SchedulerEventKind::Rebalanced { task_id, from, to } => {
            format!("{task_id} moved from {from} to {to}")
        }
    }
}
