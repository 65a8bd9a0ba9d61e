//! The seam where real work plugs in.

use std::future::Future;

use async_trait::async_trait;
use taskgraph_core::{Task, TaskExecutionError, Worker};

/// Performs a task on behalf of a worker.
///
/// The scheduler only cares whether the call succeeds. Implementations are
/// shared across concurrent executions.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, worker: &Worker) -> Result<(), TaskExecutionError>;
}

/// Adapts an async closure into a [`TaskExecutor`].
///
/// The closure receives owned snapshots of the task and worker as they were
/// when the execution started.
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(Task, Worker) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskExecutionError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(Task, Worker) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskExecutionError>> + Send,
{
    async fn execute(&self, task: &Task, worker: &Worker) -> Result<(), TaskExecutionError> {
        (self.f)(task.clone(), worker.clone()).await
    }
}
