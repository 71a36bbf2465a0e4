use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::Priority;
use crate::error::StoreError;

/// Lifecycle status of a task as persisted by the store.
///
/// State transitions:
/// - Pending -> Running -> Done
/// - Pending -> Running -> Error
///
/// Nothing ever moves a task back, except the operator-driven
/// `reset_running` recovery path (Running -> Pending).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Photometric method hint forwarded to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Aperture,
    Psf,
    Linpsf,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Aperture => "aperture",
            Method::Psf => "psf",
            Method::Linpsf => "linpsf",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aperture" => Ok(Method::Aperture),
            "psf" => Ok(Method::Psf),
            "linpsf" => Ok(Method::Linpsf),
            other => Err(format!("unknown method '{other}'")),
        }
    }
}

/// Keys of the task message that a parameter in `extra` must not shadow.
pub const RESERVED_FIELDS: [&str; 4] = ["priority", "status", "target_id", "method"];

/// Job parameters handed to the executor.
///
/// Known fields are typed; everything else the queue builder wrote
/// (sector, camera, ccd, datasource, tmag, ...) travels in `extra`,
/// flattened into the same JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParameters {
    pub target_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskParameters {
    pub fn new(target_id: i64) -> Self {
        Self {
            target_id,
            method: None,
            extra: Map::new(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// First key in `extra` that would collide with a field of `Task` once
    /// flattened.
    pub fn reserved_field(&self) -> Option<&'static str> {
        RESERVED_FIELDS
            .into_iter()
            .find(|key| self.extra.contains_key(*key))
    }
}

/// A task as stored in the queue and sent to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub priority: Priority,

    pub status: TaskStatus,

    #[serde(flatten)]
    pub parameters: TaskParameters,
}

impl Task {
    /// Split off the dispatch key, leaving the job content for the executor.
    pub fn into_parts(self) -> (Priority, TaskParameters) {
        (self.priority, self.parameters)
    }

    pub fn target_id(&self) -> i64 {
        self.parameters.target_id
    }
}

/// A task to be inserted when the queue is built. Always starts out pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub priority: Priority,

    #[serde(flatten)]
    pub parameters: TaskParameters,
}

impl NewTask {
    pub fn new(priority: impl Into<Priority>, parameters: TaskParameters) -> Self {
        Self {
            priority: priority.into(),
            parameters,
        }
    }

    /// Check the task can be stored and sent: no parameter may shadow a
    /// field of the task message.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self.parameters.reserved_field() {
            Some(field) => Err(StoreError::ReservedField {
                priority: self.priority,
                field,
            }),
            None => Ok(()),
        }
    }
}
