use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{Priority, Rank, TaskStatus};
use crate::protocol::{Role, Tag};

/// Errors raised by a task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("task store already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("task store has no todolist table: {}", .0.display())]
    MissingSchema(PathBuf),

    #[error("unknown task priority={0}")]
    UnknownTask(Priority),

    #[error("task priority={priority} is {status}, expected running")]
    NotRunning {
        priority: Priority,
        status: TaskStatus,
    },

    #[error("task priority={0} is already finished")]
    AlreadyFinished(Priority),

    #[error("duplicate task priority={0}")]
    DuplicatePriority(Priority),

    #[error("task priority={priority} has a parameter named '{field}', which is reserved")]
    ReservedField {
        priority: Priority,
        field: &'static str,
    },

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// A completion that refers to a task which is not (or no longer) running.
    ///
    /// These are logged and dropped by the task manager; everything else is
    /// a structural failure of the store.
    pub fn is_stale_completion(&self) -> bool {
        matches!(
            self,
            StoreError::UnknownTask(_) | StoreError::NotRunning { .. }
        )
    }
}

/// Violations of the controller/worker message contract.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{role} received an unknown tag {tag} from rank {from}")]
    UnknownTag { role: Role, tag: i32, from: Rank },

    #[error("{role} received unexpected tag {tag} from rank {from}")]
    UnexpectedTag { role: Role, tag: Tag, from: Rank },

    #[error("{role} received a message from rank {from}, expected the controller")]
    UnexpectedSource { role: Role, from: Rank },

    #[error("malformed {tag} payload from rank {from}: {error}")]
    Payload {
        tag: Tag,
        from: Rank,
        error: serde_json::Error,
    },

    #[error("failed to encode {tag} payload: {error}")]
    Encode { tag: Tag, error: serde_json::Error },

    #[error("no such rank {0} in the group")]
    NoSuchRank(Rank),

    #[error("communicator disconnected")]
    Disconnected,
}

/// Failures of the task execution function.
///
/// The worker loop never propagates these: they become a `FATAL` result.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("executor panicked: {0}")]
    Panicked(String),

    #[error("failed to spawn {program}: {error}")]
    Spawn {
        program: String,
        error: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid executor output: {0}")]
    InvalidOutput(String),
}

/// Invalid environment or command-line configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("no executor configured (set TASKPULL_EXECUTOR or --executor)")]
    MissingExecutor,
}

/// Errors that terminate a controller or worker.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("a process group needs at least one worker besides the controller")]
    NoWorkers,

    #[error("worker rank {0} panicked")]
    WorkerPanicked(Rank),
}
