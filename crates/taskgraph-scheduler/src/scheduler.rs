//! Task scheduler - drives a run to completion.
//!
//! One coordinating loop owns the launch decisions. Executions run as
//! spawned tasks in a `JoinSet`; the loop sleeps until one of them finishes
//! (or the rebalancer makes a launch possible) and never polls.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskgraph_core::{
    CapabilityMatcher, CoreError, SchedulerEvent, SubstringMatcher, Task, TaskExecutionError,
    TaskId, Worker, WorkerId,
};

use crate::config::SchedulerConfig;
use crate::executor::TaskExecutor;
use crate::rebalancer::Rebalancer;
use crate::report::RunReport;
use crate::state::{Run, RunState};

/// Scheduler errors. Only setup problems surface here; execution failures
/// end up in the report.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),
}

/// Stops a running scheduler from another task.
///
/// Stopping halts the rebalancer and prevents new launches. Executions
/// already started run to completion. The handle does not keep the run
/// alive.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
    state: Weak<RunState>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
        if let Some(state) = self.state.upgrade() {
            info!(run_id = %state.run_id, "Scheduler stop requested");
            state.wake();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Result of one execution, sent back to the loop.
struct Completion {
    task_id: TaskId,
    worker_id: WorkerId,
    outcome: Result<(), TaskExecutionError>,
    elapsed: Duration,
}

/// Task scheduler.
pub struct Scheduler {
    state: Arc<RunState>,
    config: Arc<SchedulerConfig>,
    executor: Arc<dyn TaskExecutor>,
    matcher: Arc<dyn CapabilityMatcher>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create a new Scheduler for `run`.
    pub fn new(
        run: Run,
        config: SchedulerConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        Ok(Self {
            state: RunState::new(run, config.event_capacity),
            config: Arc::new(config),
            executor,
            matcher: Arc::new(SubstringMatcher),
            shutdown: CancellationToken::new(),
        })
    }

    /// Builder method to replace the default substring matcher.
    pub fn with_matcher(mut self, matcher: Arc<dyn CapabilityMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Shared run state, for inspection while the run is live.
    pub fn state(&self) -> Arc<RunState> {
        self.state.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.state.subscribe()
    }

    /// Progress events as a stream. Lagged receivers yield an error item.
    pub fn events(&self) -> BroadcastStream<SchedulerEvent> {
        BroadcastStream::new(self.state.subscribe())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.shutdown.clone(),
            state: Arc::downgrade(&self.state),
        }
    }

    /// Stop the rebalancer and launching. See [`StopHandle`].
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Re-enable a worker that failed, making it eligible for work again.
    pub async fn reenable_worker(&self, worker: &WorkerId) -> Result<(), SchedulerError> {
        self.state.run.lock().await.reenable(worker)?;
        info!(worker = %worker, "Worker re-enabled");
        self.state.wake();
        Ok(())
    }

    /// Run until no task can make progress, then report.
    ///
    /// Always terminates: pending tasks that can never become ready are
    /// reported, not waited on.
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        {
            let run = self.state.run.lock().await;
            info!(
                run_id = %run.id,
                tasks = run.graph.len(),
                workers = run.registry.len(),
                max_concurrency = self.config.max_concurrency,
                "Starting run"
            );
            for task in run.graph.unreachable_tasks() {
                warn!(task_id = %task, "Task can never become ready");
            }
        }

        let rebalancer_token = self.shutdown.child_token();
        let rebalancer = Rebalancer::new(
            self.state.clone(),
            self.config.clone(),
            self.matcher.clone(),
        )
        .spawn(rebalancer_token.clone());

        let mut active: JoinSet<Completion> = JoinSet::new();

        loop {
            if !self.shutdown.is_cancelled() {
                self.launch_ready(&mut active).await;
            }
            if active.is_empty() {
                break;
            }

            tokio::select! {
                joined = active.join_next() => match joined {
                    Some(Ok(completion)) => self.settle(completion).await,
                    Some(Err(e)) => error!(error = %e, "Execution wrapper failed"),
                    None => break,
                },
                _ = self.state.woken() => {
                    debug!("Scheduler woken");
                }
            }
        }

        rebalancer_token.cancel();
        let migrations = match rebalancer.await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Rebalancer task failed");
                0
            }
        };

        let finished_at = Utc::now();
        let run = self.state.run.lock().await;
        let report = RunReport::generate(
            &run,
            started_at,
            finished_at,
            self.shutdown.is_cancelled(),
        );

        if let Some(deadlock) = &report.deadlock {
            warn!(
                run_id = %report.run_id,
                blocked = deadlock.blocked.len(),
                unplaced = deadlock.unplaced.len(),
                "Run ended with tasks that never started"
            );
            for stranded in &deadlock.blocked {
                let waiting_on: Vec<String> = stranded
                    .unmet
                    .iter()
                    .map(|dep| match dep.status {
                        Some(status) => format!("{}={}", dep.task_id, status),
                        None => format!("{}=UNKNOWN", dep.task_id),
                    })
                    .collect();
                warn!(task_id = %stranded.task_id, waiting_on = ?waiting_on, "Task stranded");
            }
        }

        info!(
            run_id = %report.run_id,
            completed = report.completed,
            failed = report.failed,
            never_started = report.never_started,
            migrations,
            duration_secs = report.duration_secs,
            "Run finished"
        );
        report
    }

    /// Launch as many (task, worker) pairs as the concurrency limit allows.
    async fn launch_ready(&self, active: &mut JoinSet<Completion>) {
        let mut run = self.state.run.lock().await;

        while active.len() < self.config.max_concurrency {
            let Some((task_id, worker_id)) = run.next_launch(self.matcher.as_ref()) else {
                break;
            };

            let (task, worker) = match run.dispatch(&task_id, &worker_id) {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    error!(task_id = %task_id, worker = %worker_id, error = %e, "Dispatch failed");
                    break;
                }
            };

            info!(
                task_id = %task_id,
                worker = %worker_id,
                priority = %task.priority,
                estimated_cost = task.estimated_cost,
                "Task started"
            );
            self.state.publish(SchedulerEvent::task_started(
                run.id.clone(),
                task_id,
                worker_id,
            ));

            active.spawn(execute(
                self.executor.clone(),
                task,
                worker,
                self.config.task_timeout(),
            ));
        }
    }

    /// Record a finished execution.
    async fn settle(&self, completion: Completion) {
        let Completion {
            task_id,
            worker_id,
            outcome,
            elapsed,
        } = completion;
        let duration_ms = elapsed.as_millis() as i64;

        let mut run = self.state.run.lock().await;
        match run.settle(&task_id, &worker_id, &outcome) {
            Ok(released) => {
                for id in released {
                    info!(
                        task_id = %id,
                        worker = %worker_id,
                        "Reservation released by failed worker"
                    );
                }
            }
            Err(e) => {
                error!(
                    task_id = %task_id,
                    worker = %worker_id,
                    error = %e,
                    "Failed to record outcome"
                );
            }
        }

        let event = match &outcome {
            Ok(()) => {
                info!(task_id = %task_id, worker = %worker_id, duration_ms, "Task completed");
                SchedulerEvent::task_completed(run.id.clone(), task_id, worker_id, duration_ms)
            }
            Err(err) => {
                warn!(task_id = %task_id, worker = %worker_id, error = %err, "Task failed");
                SchedulerEvent::task_failed(run.id.clone(), task_id, worker_id, err.to_string())
            }
        };
        self.state.publish(event);
    }
}

/// Run one task on its worker, containing timeouts and panics.
async fn execute(
    executor: Arc<dyn TaskExecutor>,
    task: Task,
    worker: Worker,
    timeout: Option<Duration>,
) -> Completion {
    let task_id = task.id.clone();
    let worker_id = worker.id.clone();
    let started = Instant::now();

    let handle = tokio::spawn(async move {
        let fut = executor.execute(&task, &worker);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or_else(|_| Err(TaskExecutionError::TimedOut(limit.as_millis() as u64))),
            None => fut.await,
        }
    });

    let outcome = match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(TaskExecutionError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(TaskExecutionError::failed(e.to_string())),
    };

    Completion {
        task_id,
        worker_id,
        outcome,
        elapsed: started.elapsed(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio::sync::{mpsc, Semaphore};

    use taskgraph_core::{
        Priority, SchedulerEventKind, TaskDescriptor, TaskStatus, WorkerDescriptor, WorkerStatus,
    };

    use crate::executor::FnExecutor;

    fn tid(s: &str) -> TaskId {
        TaskId::new(s)
    }

    fn wid(s: &str) -> WorkerId {
        WorkerId::new(s)
    }

    /// Reports each start, then blocks until the test hands out a permit.
    struct GatedExecutor {
        started: mpsc::UnboundedSender<(TaskId, WorkerId)>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl TaskExecutor for GatedExecutor {
        async fn execute(&self, task: &Task, worker: &Worker) -> Result<(), TaskExecutionError> {
            let _ = self.started.send((task.id.clone(), worker.id.clone()));
            self.gate
                .acquire()
                .await
                .map_err(|e| TaskExecutionError::failed(e.to_string()))?
                .forget();
            Ok(())
        }
    }

    fn instant_ok() -> Arc<dyn TaskExecutor> {
        Arc::new(FnExecutor::new(|_task: Task, _worker: Worker| async {
            Ok::<(), TaskExecutionError>(())
        }))
    }

    fn fail_kind(kind: &'static str) -> Arc<dyn TaskExecutor> {
        Arc::new(FnExecutor::new(move |task: Task, _worker: Worker| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if task.kind == kind {
                Err(TaskExecutionError::failed(format!("{} broke", task.id)))
            } else {
                Ok(())
            }
        }))
    }

    fn config(max_concurrency: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrency,
            rebalance_interval_ms: 10,
            ..Default::default()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_concurrency_limit_and_third_task_waits() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("a", "x", 1.0),
                TaskDescriptor::new("b", "x", 1.0),
                TaskDescriptor::new("c", "x", 1.0),
            ],
            vec![
                WorkerDescriptor::new("w1", ["x"]),
                WorkerDescriptor::new("w2", ["x"]),
            ],
        )
        .unwrap();

        let (tx, mut started) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(GatedExecutor {
            started: tx,
            gate: gate.clone(),
        });
        let scheduler = Arc::new(Scheduler::new(run, config(2), executor).unwrap());
        let state = scheduler.state();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        let mut first_two = HashSet::new();
        for _ in 0..2 {
            first_two.insert(started.recv().await.unwrap().0);
        }
        assert_eq!(first_two, HashSet::from([tid("a"), tid("b")]));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(started.try_recv().is_err());
        {
            let run = state.run.lock().await;
            assert_eq!(run.registry.get(&wid("w1")).unwrap().status, WorkerStatus::Working);
            assert_eq!(run.registry.get(&wid("w2")).unwrap().status, WorkerStatus::Working);
            assert_eq!(run.graph.get(&tid("c")).unwrap().status, TaskStatus::Pending);
        }

        gate.add_permits(1);
        let (third, _) = started.recv().await.unwrap();
        assert_eq!(third, tid("c"));

        gate.add_permits(2);
        let report = handle.await.unwrap();
        assert_eq!(report.completed, 3);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failed_dependency_strands_dependent() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("y", "fail", 1.0),
                TaskDescriptor::new("x", "work", 1.0).depends_on("y"),
            ],
            vec![
                WorkerDescriptor::new("w1", ["work", "fail"]),
                WorkerDescriptor::new("w2", ["work", "fail"]),
            ],
        )
        .unwrap();

        let scheduler = Scheduler::new(run, config(2), fail_kind("fail")).unwrap();
        let report = scheduler.run().await;

        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].task_id, tid("y"));
        assert_eq!(report.failures[0].error, "y broke");
        assert_eq!(report.never_started_tasks, vec![tid("x")]);

        let deadlock = report.deadlock.expect("deadlock warning");
        assert_eq!(deadlock.blocked.len(), 1);
        assert_eq!(deadlock.blocked[0].task_id, tid("x"));
        assert_eq!(deadlock.blocked[0].unmet[0].status, Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn test_all_tasks_failing_still_reports() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("a", "fail", 2.0),
                TaskDescriptor::new("b", "fail", 3.0),
            ],
            vec![
                WorkerDescriptor::new("w1", ["fail"]),
                WorkerDescriptor::new("w2", ["fail"]),
            ],
        )
        .unwrap();

        let scheduler = Scheduler::new(run, config(2), fail_kind("fail")).unwrap();
        let report = scheduler.run().await;

        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(report.estimated_secs, 0.0);
        assert_eq!(report.efficiency, -1.0);
        assert_eq!(report.throughput, 0.0);
        assert!(report
            .workers
            .iter()
            .all(|w| w.status == WorkerStatus::Failed && w.last_error.is_some()));
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("a", "x", 1.0).depends_on("b"),
                TaskDescriptor::new("b", "x", 1.0).depends_on("a"),
                TaskDescriptor::new("c", "x", 1.0),
            ],
            vec![WorkerDescriptor::new("w1", ["x"])],
        )
        .unwrap();

        let scheduler = Scheduler::new(run, config(1), instant_ok()).unwrap();
        let report = scheduler.run().await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.never_started, 2);
        let deadlock = report.deadlock.unwrap();
        let blocked: Vec<_> = deadlock.blocked.iter().map(|s| s.task_id.clone()).collect();
        assert_eq!(blocked, vec![tid("a"), tid("b")]);
    }

    #[tokio::test]
    async fn test_launch_order_follows_priority() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("low", "x", 1.0).with_priority(Priority::Low),
                TaskDescriptor::new("high", "x", 1.0).with_priority(Priority::High),
                TaskDescriptor::new("medium", "x", 1.0),
                TaskDescriptor::new("high-cheap", "x", 0.5).with_priority(Priority::High),
            ],
            vec![WorkerDescriptor::new("w1", ["x"])],
        )
        .unwrap();

        let scheduler = Scheduler::new(run, config(1), instant_ok()).unwrap();
        let mut rx = scheduler.subscribe();
        scheduler.run().await;

        let started: Vec<TaskId> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e.kind, SchedulerEventKind::TaskStarted { .. }))
            .map(|e| e.task_id().clone())
            .collect();
        assert_eq!(
            started,
            vec![tid("high-cheap"), tid("high"), tid("medium"), tid("low")]
        );
    }

    #[tokio::test]
    async fn test_random_dag_respects_dependencies() {
        let mut rng = StdRng::seed_from_u64(0x7a5c);
        let kinds = ["build", "test"];
        let mut tasks = Vec::new();
        for i in 0..30 {
            let mut desc = TaskDescriptor::new(
                format!("t{i:02}"),
                kinds[rng.gen_range(0..kinds.len())],
                rng.gen_range(1..5) as f64,
            );
            for j in 0..i {
                if rng.gen_bool(0.15) {
                    desc = desc.depends_on(format!("t{j:02}"));
                }
            }
            tasks.push(desc);
        }
        let total = tasks.len();

        let run = Run::new(
            tasks,
            vec![
                WorkerDescriptor::new("builder", ["build"]),
                WorkerDescriptor::new("tester", ["test"]),
                WorkerDescriptor::new("generalist", ["build", "test"]),
            ],
        )
        .unwrap();

        let done: Arc<std::sync::Mutex<HashSet<TaskId>>> = Default::default();
        let executor = Arc::new(FnExecutor::new({
            let done = done.clone();
            move |task: Task, _worker: Worker| {
                let done = done.clone();
                async move {
                    let missing = {
                        let done = done.lock().unwrap();
                        task.dependencies.iter().any(|d| !done.contains(d))
                    };
                    if missing {
                        return Err(TaskExecutionError::failed("started before dependencies"));
                    }
                    tokio::time::sleep(Duration::from_millis(task.estimated_cost as u64)).await;
                    done.lock().unwrap().insert(task.id.clone());
                    Ok(())
                }
            }
        }));

        let scheduler = Scheduler::new(run, config(3), executor).unwrap();
        let state = scheduler.state();
        let mut rx = scheduler.subscribe();

        let checker = tokio::spawn(async move {
            let mut finished = 0;
            while finished < total {
                let event = rx.recv().await.unwrap();
                if matches!(
                    event.kind,
                    SchedulerEventKind::TaskCompleted { .. } | SchedulerEventKind::TaskFailed { .. }
                ) {
                    finished += 1;
                }
                state.run.lock().await.check_invariants().unwrap();
            }
        });

        let report = scheduler.run().await;
        checker.await.unwrap();

        assert_eq!(report.completed, total);
        assert!(report.failures.is_empty());
        scheduler.state().run.lock().await.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_rebalancing_moves_reserved_work_during_run() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("a", "security", 5.0).pinned_to("busy"),
                TaskDescriptor::new("b", "security", 5.0).pinned_to("busy"),
                TaskDescriptor::new("c", "security", 5.0).pinned_to("busy"),
            ],
            vec![
                WorkerDescriptor::new("busy", ["security"]),
                WorkerDescriptor::new("spare", ["security"]),
            ],
        )
        .unwrap();

        let executor = Arc::new(FnExecutor::new(|_task: Task, _worker: Worker| async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok::<(), TaskExecutionError>(())
        }));
        let scheduler = Scheduler::new(run, config(2), executor).unwrap();
        let mut rx = scheduler.subscribe();
        let report = scheduler.run().await;

        assert_eq!(report.completed, 3);
        assert!(report.redistributions >= 1);

        let events = drain(&mut rx);
        let moved: Vec<TaskId> = events
            .iter()
            .filter_map(|e| match &e.kind {
                SchedulerEventKind::Rebalanced { task_id, from, to } => {
                    assert_eq!((from, to), (&wid("busy"), &wid("spare")));
                    Some(task_id.clone())
                }
                _ => None,
            })
            .collect();
        assert!(!moved.is_empty());
        assert!(!moved.contains(&tid("a")));
        assert!(events.iter().any(|e| matches!(
            &e.kind,
            SchedulerEventKind::TaskStarted { task_id, worker }
                if moved.contains(task_id) && worker == &wid("spare")
        )));
    }

    #[tokio::test]
    async fn test_stop_before_run_launches_nothing() {
        let run = Run::new(
            vec![TaskDescriptor::new("a", "x", 1.0)],
            vec![WorkerDescriptor::new("w1", ["x"])],
        )
        .unwrap();

        let scheduler = Scheduler::new(run, config(1), instant_ok()).unwrap();
        let handle = scheduler.stop_handle();
        handle.stop();
        assert!(handle.is_stopped());

        let report = scheduler.run().await;
        assert!(report.stopped);
        assert_eq!(report.never_started_tasks, vec![tid("a")]);
        assert!(report.deadlock.is_none());
    }

    #[tokio::test]
    async fn test_timeout_fails_task() {
        let run = Run::new(
            vec![TaskDescriptor::new("slow", "x", 1.0)],
            vec![WorkerDescriptor::new("w1", ["x"])],
        )
        .unwrap();

        let executor = Arc::new(FnExecutor::new(|_task: Task, _worker: Worker| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), TaskExecutionError>(())
        }));
        let config = SchedulerConfig {
            task_timeout_ms: Some(20),
            ..config(1)
        };
        let report = Scheduler::new(run, config, executor).unwrap().run().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].error, "Timed out after 20 ms");
    }

    #[tokio::test]
    async fn test_panicking_executor_is_contained() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("boom", "x", 1.0),
                TaskDescriptor::new("after", "x", 1.0).depends_on("boom"),
            ],
            vec![WorkerDescriptor::new("w1", ["x"])],
        )
        .unwrap();

        let executor = Arc::new(FnExecutor::new(|task: Task, _worker: Worker| async move {
            if task.id.as_str() == "boom" {
                panic!("kaboom");
            }
            Ok::<(), TaskExecutionError>(())
        }));
        let report = Scheduler::new(run, config(1), executor).unwrap().run().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].error, "Execution panicked: kaboom");
        assert_eq!(report.never_started_tasks, vec![tid("after")]);
    }

    #[tokio::test]
    async fn test_reenable_unknown_worker_errors() {
        let run = Run::new(
            vec![TaskDescriptor::new("a", "x", 1.0)],
            vec![WorkerDescriptor::new("w1", ["x"])],
        )
        .unwrap();
        let scheduler = Scheduler::new(run, config(1), instant_ok()).unwrap();

        let err = scheduler.reenable_worker(&wid("ghost")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Core(CoreError::UnknownWorker(_))));
        scheduler.reenable_worker(&wid("w1")).await.unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let run = Run::new(Vec::<TaskDescriptor>::new(), Vec::<WorkerDescriptor>::new()).unwrap();
        let result = Scheduler::new(run, config(0), instant_ok());
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unknown_dependency_terminates_with_warning() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("ok", "x", 1.0),
                TaskDescriptor::new("orphan", "x", 1.0).depends_on("ghost"),
            ],
            vec![WorkerDescriptor::new("w1", ["x"])],
        )
        .unwrap();

        let report = Scheduler::new(run, config(1), instant_ok()).unwrap().run().await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.never_started_tasks, vec![tid("orphan")]);
        let deadlock = report.deadlock.expect("deadlock warning");
        assert_eq!(deadlock.blocked.len(), 1);
        assert_eq!(deadlock.blocked[0].task_id, tid("orphan"));
        assert_eq!(deadlock.blocked[0].unmet[0].task_id, tid("ghost"));
        assert_eq!(deadlock.blocked[0].unmet[0].status, None);
        assert!(deadlock.unplaced.is_empty());
    }

    #[tokio::test]
    async fn test_stop_handle_mid_run_lets_running_task_finish() {
        let run = Run::new(
            vec![
                TaskDescriptor::new("a", "x", 1.0),
                TaskDescriptor::new("b", "x", 2.0),
            ],
            vec![WorkerDescriptor::new("w1", ["x"])],
        )
        .unwrap();

        let (tx, mut started) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(GatedExecutor {
            started: tx,
            gate: gate.clone(),
        });
        let scheduler = Arc::new(Scheduler::new(run, config(1), executor).unwrap());
        let stop = scheduler.stop_handle();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        assert_eq!(started.recv().await.unwrap().0, tid("a"));
        stop.stop();
        assert!(stop.is_stopped());
        gate.add_permits(1);

        let report = handle.await.unwrap();
        assert!(report.stopped);
        assert_eq!(report.completed, 1);
        assert_eq!(report.never_started_tasks, vec![tid("b")]);
        assert!(report.deadlock.is_none());
        assert!(started.try_recv().is_err());

        // a handle that outlives its scheduler is inert
        drop(scheduler);
        stop.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_invariants_hold_while_rebalancing_live_run() {
        let mut rng = StdRng::seed_from_u64(0xbeef);
        let workers = ["w0", "w1", "w2", "w3", "w4"];
        let failing = ["t03", "t17"];

        let mut tasks = Vec::new();
        for i in 0..40 {
            let id = format!("t{i:02}");
            let mut desc = TaskDescriptor::new(id.clone(), "job", rng.gen_range(1..4) as f64);
            // w0 and w1 carry the work, w2 and w3 start empty and help
            if failing.contains(&id.as_str()) {
                desc = desc.pinned_to("w4").with_label("fail", "true");
            } else {
                desc = desc.pinned_to(workers[rng.gen_range(0..2)]);
                for j in 0..i {
                    if rng.gen_bool(0.1) {
                        desc = desc.depends_on(format!("t{j:02}"));
                    }
                }
            }
            tasks.push(desc);
        }
        let total = tasks.len();

        let run = Run::new(
            tasks,
            workers.iter().map(|w| WorkerDescriptor::new(*w, ["job"])),
        )
        .unwrap();

        let executor = Arc::new(FnExecutor::new(|task: Task, _worker: Worker| async move {
            tokio::time::sleep(Duration::from_millis(task.estimated_cost as u64)).await;
            if task.labels.get("fail").map(String::as_str) == Some("true") {
                Err(TaskExecutionError::failed(format!("{} broke", task.id)))
            } else {
                Ok(())
            }
        }));
        let config = SchedulerConfig {
            max_concurrency: 4,
            overload_threshold: 6.0,
            help_threshold: 3.0,
            rebalance_interval_ms: 1,
            ..Default::default()
        };
        let scheduler = Scheduler::new(run, config, executor).unwrap();
        let state = scheduler.state();
        let mut rx = scheduler.subscribe();
        let done = CancellationToken::new();

        let checker = tokio::spawn({
            let done = done.clone();
            async move {
                let mut checks = 0usize;
                let mut migrations = 0usize;
                let mut ticker = tokio::time::interval(Duration::from_millis(1));
                loop {
                    tokio::select! {
                        _ = done.cancelled() => break,
                        event = rx.recv() => {
                            let moved = event.is_ok_and(|e| {
                                matches!(e.kind, SchedulerEventKind::Rebalanced { .. })
                            });
                            if moved {
                                migrations += 1;
                            }
                        }
                        _ = ticker.tick() => {}
                    }
                    state.run.lock().await.check_invariants().unwrap();
                    checks += 1;
                }
                (checks, migrations)
            }
        });

        let report = scheduler.run().await;
        done.cancel();
        let (checks, migrations) = checker.await.unwrap();

        assert!(checks > 0);
        assert!(migrations > 0);
        assert!(report.redistributions > 0);
        assert_eq!(report.failed, failing.len());
        assert_eq!(report.completed + report.failed + report.never_started, total);
        scheduler.state().run.lock().await.check_invariants().unwrap();
    }
}
