//! TaskExecutor port - the function that runs one task.

use async_trait::async_trait;

use crate::domain::{ExecutionReport, TaskParameters};
use crate::error::ExecutorError;

/// Runs a single task and reports its outcome.
///
/// Returned errors (and panics) are caught by the worker loop and turned into
/// a `FATAL` result; they never stop the worker.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    async fn execute(&self, parameters: TaskParameters) -> Result<ExecutionReport, ExecutorError>;
}
