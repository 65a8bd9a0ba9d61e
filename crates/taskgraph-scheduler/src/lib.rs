//! taskgraph scheduler
//!
//! Drives a [`Run`] to completion: pairs ready tasks with workers, executes
//! them concurrently up to a limit, rebalances reserved work on a timer and
//! produces a [`RunReport`].

pub mod config;
pub mod executor;
pub mod metrics;
pub mod rebalancer;
pub mod report;
pub mod scheduler;
pub mod state;

pub use config::SchedulerConfig;
pub use executor::{FnExecutor, TaskExecutor};
pub use rebalancer::{Migration, Rebalancer};
pub use report::{DeadlockWarning, RunReport, TaskFailure, TaskTiming, WorkerSummary};
pub use scheduler::{Scheduler, SchedulerError, StopHandle};
pub use state::{Run, RunState};
