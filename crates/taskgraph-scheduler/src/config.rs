//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler configuration, typically read from the `config` section of a
/// plan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of executions in flight.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Workload above which a worker counts as overloaded.
    #[serde(default = "default_overload_threshold")]
    pub overload_threshold: f64,

    /// Workload below which an available worker may receive moved tasks.
    #[serde(default = "default_help_threshold")]
    pub help_threshold: f64,

    /// Rebalancer tick period (milliseconds).
    #[serde(default = "default_rebalance_interval_ms")]
    pub rebalance_interval_ms: u64,

    /// Optional limit on a single execution (milliseconds).
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,

    /// Buffer size of the event channel. Slow subscribers lag past this.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_overload_threshold() -> f64 {
    10.0
}

fn default_help_threshold() -> f64 {
    5.0
}

fn default_rebalance_interval_ms() -> u64 {
    1_000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            overload_threshold: default_overload_threshold(),
            help_threshold: default_help_threshold(),
            rebalance_interval_ms: default_rebalance_interval_ms(),
            task_timeout_ms: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl SchedulerConfig {
    /// Check the values, returning a description of the first bad one.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be at least 1".into());
        }
        for (name, value) in [
            ("overload_threshold", self.overload_threshold),
            ("help_threshold", self.help_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number, got {value}"));
            }
        }
        if self.rebalance_interval_ms == 0 {
            return Err("rebalance_interval_ms must be positive".into());
        }
        if self.task_timeout_ms == Some(0) {
            return Err("task_timeout_ms must be positive when set".into());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be at least 1".into());
        }
        Ok(())
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}
