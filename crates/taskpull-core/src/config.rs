//! Run configuration read from the environment.
//!
//! | variable            | default                      |
//! |---------------------|------------------------------|
//! | `TASKPULL_INPUT`    | `./tests/input`              |
//! | `TASKPULL_OUTPUT`   | `.`                          |
//! | `TASKPULL_TODO`     | `<input>/todo.sqlite`        |
//! | `TASKPULL_WORKERS`  | available parallelism - 1    |
//! | `TASKPULL_EXECUTOR` | none (required to execute)   |

use std::path::{Path, PathBuf};
use std::thread;

use crate::error::ConfigError;

pub const ENV_INPUT: &str = "TASKPULL_INPUT";
pub const ENV_OUTPUT: &str = "TASKPULL_OUTPUT";
pub const ENV_TODO: &str = "TASKPULL_TODO";
pub const ENV_WORKERS: &str = "TASKPULL_WORKERS";
pub const ENV_EXECUTOR: &str = "TASKPULL_EXECUTOR";

/// Name of the queue file inside the input folder.
pub const TODO_FILE_NAME: &str = "todo.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    pub todo_file: PathBuf,
    pub workers: usize,
    pub executor: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let input_folder = get(ENV_INPUT)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./tests/input"));
        let output_folder = get(ENV_OUTPUT)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let todo_file = get(ENV_TODO)
            .map(PathBuf::from)
            .unwrap_or_else(|| input_folder.join(TODO_FILE_NAME));
        let workers = match get(ENV_WORKERS) {
            Some(raw) => parse_workers(ENV_WORKERS, &raw)?,
            None => default_workers(),
        };
        let executor = get(ENV_EXECUTOR).map(PathBuf::from);

        Ok(Self {
            input_folder,
            output_folder,
            todo_file,
            workers,
            executor,
        })
    }

    /// Point at another input folder; the queue file follows unless it was
    /// set explicitly.
    pub fn with_input_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        if self.todo_file == self.input_folder.join(TODO_FILE_NAME) {
            self.todo_file = folder.join(TODO_FILE_NAME);
        }
        self.input_folder = folder;
        self
    }

    pub fn executor(&self) -> Result<&Path, ConfigError> {
        self.executor.as_deref().ok_or(ConfigError::MissingExecutor)
    }
}

/// One core is left for the controller.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

pub fn parse_workers(key: &str, raw: &str) -> Result<usize, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{message}: {raw:?}"),
    };
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(invalid("at least one worker is required")),
        Ok(n) => Ok(n),
        Err(_) => Err(invalid("not a positive integer")),
    }
}
