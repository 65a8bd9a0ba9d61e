//! Periodic migration of reserved work from overloaded workers to helpers.
//!
//! Only `Pending` tasks attributed to a worker are candidates. A task that
//! is executing is never moved.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskgraph_core::{CapabilityMatcher, SchedulerEvent, TaskId, TaskStatus, WorkerId, WorkerStatus};

use crate::config::SchedulerConfig;
use crate::state::{Run, RunState};

/// One task moved by the rebalancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub task_id: TaskId,
    pub from: WorkerId,
    pub to: WorkerId,
}

/// Run a single rebalancing pass over `run`.
///
/// Overloaded workers and helpers are picked once, at the start of the
/// pass. Every (overloaded, helper) pair then moves at most one task, and
/// a helper stops receiving once it has taken one.
pub fn rebalance_once(
    run: &mut Run,
    config: &SchedulerConfig,
    matcher: &dyn CapabilityMatcher,
) -> Vec<Migration> {
    let mut overloaded: Vec<(WorkerId, f64)> = run
        .registry
        .workers()
        .filter(|w| w.workload() > config.overload_threshold && w.attributed_count() > 1)
        .map(|w| (w.id.clone(), w.workload()))
        .collect();
    overloaded.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut helpers: Vec<(WorkerId, f64)> = run
        .registry
        .workers()
        .filter(|w| {
            w.status != WorkerStatus::Failed
                && w.can_help
                && w.workload() < config.help_threshold
        })
        .map(|w| (w.id.clone(), w.workload()))
        .collect();
    helpers.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut moved = Vec::new();

    for (source, _) in &overloaded {
        for (helper, _) in &helpers {
            if helper == source {
                continue;
            }
            let Ok(helper_worker) = run.registry.get(helper) else {
                continue;
            };
            if !helper_worker.can_help {
                continue;
            }
            let Ok(source_worker) = run.registry.get(source) else {
                break;
            };

            let mut candidates: Vec<_> = source_worker
                .reserved_tasks()
                .filter_map(|id| run.graph.get(id))
                .filter(|t| t.status == TaskStatus::Pending)
                .filter(|t| matcher.matches(t, &helper_worker.capabilities))
                .collect();
            candidates.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.estimated_cost.total_cmp(&b.estimated_cost))
                    .then_with(|| a.id.cmp(&b.id))
            });
            let Some(task_id) = candidates.first().map(|t| t.id.clone()) else {
                continue;
            };

            match run.migrate(&task_id, source, helper) {
                Ok(()) => moved.push(Migration {
                    task_id,
                    from: source.clone(),
                    to: helper.clone(),
                }),
                Err(e) => warn!(task_id = %task_id, error = %e, "Migration rejected"),
            }
        }
    }

    moved
}

/// Background ticker that rebalances a shared run.
pub struct Rebalancer {
    state: Arc<RunState>,
    config: Arc<SchedulerConfig>,
    matcher: Arc<dyn CapabilityMatcher>,
}

impl Rebalancer {
    pub fn new(
        state: Arc<RunState>,
        config: Arc<SchedulerConfig>,
        matcher: Arc<dyn CapabilityMatcher>,
    ) -> Self {
        Self {
            state,
            config,
            matcher,
        }
    }

    /// One tick: rebalance under the run lock, then publish.
    pub async fn tick(&self) -> Vec<Migration> {
        let migrations = {
            let mut run = self.state.run.lock().await;
            rebalance_once(&mut run, &self.config, self.matcher.as_ref())
        };

        for m in &migrations {
            info!(task_id = %m.task_id, from = %m.from, to = %m.to, "Rebalanced task");
            self.state.publish(SchedulerEvent::rebalanced(
                self.state.run_id.clone(),
                m.task_id.clone(),
                m.from.clone(),
                m.to.clone(),
            ));
        }
        if !migrations.is_empty() {
            self.state.wake();
        }
        migrations
    }

    /// Tick every `rebalance_interval` until `token` is cancelled.
    ///
    /// Resolves to the number of tasks moved.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.rebalance_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            let mut total = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        total += self.tick().await.len();
                    }
                }
            }
            debug!(moved = total, "Rebalancer stopped");
            total
        })
    }
}
