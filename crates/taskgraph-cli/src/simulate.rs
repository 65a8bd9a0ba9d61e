//! Simulated executor used by `taskgraph run`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use taskgraph_core::{Task, TaskExecutionError, Worker};
use taskgraph_scheduler::TaskExecutor;

/// Label that makes a task fail when set to `true`.
pub const FAIL_LABEL: &str = "simulate.fail";

/// Sleeps for `estimated_cost * time_scale` seconds per task.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    time_scale: f64,
}

impl SimulatedExecutor {
    pub fn new(time_scale: f64) -> Self {
        Self { time_scale }
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, task: &Task, worker: &Worker) -> Result<(), TaskExecutionError> {
        let secs = task.estimated_cost * self.time_scale;
        debug!(task_id = %task.id, worker = %worker.id, secs, "Simulating task");
        let delay = Duration::try_from_secs_f64(secs)
            .map_err(|e| TaskExecutionError::failed(format!("bad simulated duration: {e}")))?;
        tokio::time::sleep(delay).await;

        if task.labels.get(FAIL_LABEL).map(String::as_str) == Some("true") {
            return Err(TaskExecutionError::failed(format!(
                "{} failed on {} (simulated)",
                task.id, worker.id
            )));
        }
        Ok(())
    }
}
