//! Plan files: a JSON document with `config`, `workers` and `tasks`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use taskgraph_core::{CoreError, TaskDescriptor, WorkerDescriptor};
use taskgraph_scheduler::{Run, SchedulerConfig, SchedulerError};

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid plan: {0}")]
    Plan(#[from] CoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} task(s) can never become ready")]
    Unreachable(usize),

    #[error("Run finished with {failed} failed and {never_started} never-started task(s)")]
    RunIncomplete { failed: usize, never_started: usize },
}

/// A plan as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub config: SchedulerConfig,

    #[serde(default)]
    pub workers: Vec<WorkerDescriptor>,

    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
}

impl Plan {
    /// Read and parse a plan file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CliError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate the config and build the run. Executes nothing.
    pub fn build(self) -> Result<(SchedulerConfig, Run), CliError> {
        self.config
            .validate()
            .map_err(|e| CliError::Scheduler(SchedulerError::InvalidConfig(e)))?;
        let run = Run::new(self.tasks, self.workers)?;
        Ok((self.config, run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_plan(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_plan_with_defaults() {
        let file = write_plan(
            r#"{
                "config": { "max_concurrency": 2 },
                "workers": [{ "name": "w1", "capabilities": ["security"] }],
                "tasks": [
                    { "id": "scan", "kind": "security", "estimated_cost": 1.5 },
                    { "id": "report", "kind": "docs", "estimated_cost": 0.5,
                      "priority": "high", "dependencies": ["scan"] }
                ]
            }"#,
        );

        let plan = Plan::load(file.path()).unwrap();
        assert_eq!(plan.config.max_concurrency, 2);
        assert_eq!(plan.config.overload_threshold, 10.0);
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].dependencies.len(), 1);

        let (_, run) = plan.build().unwrap();
        assert_eq!(run.graph.len(), 2);
        assert_eq!(run.registry.len(), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Plan::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }

    #[test]
    fn test_malformed_plan_is_parse_error() {
        let file = write_plan(r#"{ "tasks": [ { "id": "a" } ] }"#);
        let err = Plan::load(file.path()).unwrap_err();
        assert!(matches!(err, CliError::Parse { .. }));
    }

    #[test]
    fn test_build_rejects_bad_config_and_duplicates() {
        let file = write_plan(r#"{ "config": { "max_concurrency": 0 } }"#);
        let err = Plan::load(file.path()).unwrap().build().unwrap_err();
        assert!(matches!(
            err,
            CliError::Scheduler(SchedulerError::InvalidConfig(_))
        ));

        let file = write_plan(
            r#"{ "tasks": [
                { "id": "a", "kind": "x", "estimated_cost": 1 },
                { "id": "a", "kind": "x", "estimated_cost": 1 }
            ] }"#,
        );
        let err = Plan::load(file.path()).unwrap().build().unwrap_err();
        assert!(matches!(err, CliError::Plan(CoreError::DuplicateTask(_))));
    }
}
