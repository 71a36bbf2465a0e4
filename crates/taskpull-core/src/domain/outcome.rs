//! Outcome model: the result format produced by executing a task.
//!
//! This module does not assume queues, workers or persistence. It only
//! defines the "shape" of results that the worker reports and the store keeps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::{Priority, TaskParameters, TaskStatus};
use crate::error::ExecutorError;

/// Outcome code of one task execution.
///
/// Serialized as SCREAMING_SNAKE_CASE: OK / WARNING / ERROR / FATAL.
/// `FATAL` is reserved for the worker loop: the executor itself failed
/// before producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The executor never set a status.
    Unknown,
    Ok,
    /// Completed with a caveat (e.g. high contamination).
    Warning,
    /// Task-specific failure (e.g. degenerate input).
    Error,
    Fatal,
    Skipped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Unknown => "UNKNOWN",
            Outcome::Ok => "OK",
            Outcome::Warning => "WARNING",
            Outcome::Error => "ERROR",
            Outcome::Fatal => "FATAL",
            Outcome::Skipped => "SKIPPED",
        }
    }

    /// Coarsen the outcome into the pass/fail status the store persists.
    pub fn store_status(self) -> TaskStatus {
        match self {
            Outcome::Ok | Outcome::Warning | Outcome::Skipped => TaskStatus::Done,
            Outcome::Error | Outcome::Fatal | Outcome::Unknown => TaskStatus::Error,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNKNOWN" => Ok(Outcome::Unknown),
            "OK" => Ok(Outcome::Ok),
            "WARNING" => Ok(Outcome::Warning),
            "ERROR" => Ok(Outcome::Error),
            "FATAL" => Ok(Outcome::Fatal),
            "SKIPPED" => Ok(Outcome::Skipped),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

/// What a task executor hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: Outcome,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl ExecutionReport {
    pub fn new(status: Outcome) -> Self {
        Self {
            status,
            details: Map::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(Outcome::Ok)
    }

    pub fn warning() -> Self {
        Self::new(Outcome::Warning)
    }

    pub fn error() -> Self {
        Self::new(Outcome::Error)
    }

    /// The report used when the executor itself failed.
    pub fn fatal(error: &ExecutorError) -> Self {
        Self::new(Outcome::Fatal).with_detail("error", error.to_string())
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Result message sent from a worker back to the controller.
///
/// `priority` addresses the completion; `parameters` are the identifying
/// fields of the task as the executor saw them (without the priority).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub priority: Priority,

    pub status: Outcome,

    /// Wall-clock seconds spent in the executor.
    pub elapsed_time: f64,

    #[serde(default)]
    pub details: Map<String, Value>,

    pub parameters: TaskParameters,
}

impl TaskResult {
    pub fn new(
        priority: Priority,
        parameters: TaskParameters,
        report: ExecutionReport,
        elapsed: Duration,
    ) -> Self {
        Self {
            priority,
            status: report.status,
            elapsed_time: elapsed.as_secs_f64(),
            details: report.details,
            parameters,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::try_from_secs_f64(self.elapsed_time).unwrap_or_default()
    }
}

/// A result as persisted alongside its task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub priority: Priority,
    pub status: Outcome,
    pub elapsed_time: f64,
    pub details: Map<String, Value>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Outcome::Ok, TaskStatus::Done)]
    #[case(Outcome::Warning, TaskStatus::Done)]
    #[case(Outcome::Skipped, TaskStatus::Done)]
    #[case(Outcome::Error, TaskStatus::Error)]
    #[case(Outcome::Fatal, TaskStatus::Error)]
    #[case(Outcome::Unknown, TaskStatus::Error)]
    fn outcome_coarsens_into_store_status(#[case] outcome: Outcome, #[case] expected: TaskStatus) {
        assert_eq!(outcome.store_status(), expected);
    }

    #[test]
    fn outcome_serializes_as_required_names() {
        let s = serde_json::to_string(&Outcome::Warning).unwrap();
        assert_eq!(s, "\"WARNING\"");
        assert_eq!("FATAL".parse::<Outcome>().unwrap(), Outcome::Fatal);
    }

    #[test]
    fn fatal_report_carries_the_error_message() {
        let report = ExecutionReport::fatal(&ExecutorError::Failed("boom".to_string()));
        assert_eq!(report.status, Outcome::Fatal);
        assert_eq!(report.details["error"], "boom");
    }

    #[test]
    fn result_records_elapsed_seconds() {
        let result = TaskResult::new(
            Priority::new(1),
            TaskParameters::new(42),
            ExecutionReport::ok().with_detail("flux", 1.5),
            Duration::from_millis(1230),
        );
        assert!((result.elapsed_time - 1.23).abs() < 1e-9);
        assert_eq!(result.details["flux"], 1.5);
        assert_eq!(result.elapsed(), Duration::from_millis(1230));
    }
}
