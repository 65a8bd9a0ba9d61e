//! taskgraph core domain types
//!
//! This crate contains the synchronous half of the scheduler:
//! - Task and worker records and their status enums
//! - The dependency graph and its readiness queries
//! - The worker registry and capability matching
//!
//! Nothing here spawns, sleeps or locks. The async control loop lives in
//! `taskgraph-scheduler` and drives these types under a single mutex.

pub mod error;
pub mod event;
pub mod graph;
pub mod ids;
pub mod matcher;
pub mod registry;
pub mod status;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use error::{CoreError, TaskExecutionError};
pub use event::{SchedulerEvent, SchedulerEventKind};
pub use graph::{StrandedTask, TaskGraph, UnmetDependency};
pub use ids::{RunId, TaskId, WorkerId};
pub use matcher::{CapabilityMatcher, ExactTagMatcher, SubstringMatcher};
pub use registry::WorkerRegistry;
pub use status::{Priority, TaskStatus, WorkerStatus};
pub use task::{Task, TaskDescriptor};
pub use worker::{Worker, WorkerDescriptor};
