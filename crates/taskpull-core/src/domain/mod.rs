//! Domain model (IDs, tasks, outcomes).

pub mod ids;
pub mod outcome;
pub mod task;

pub use ids::{Priority, Rank, RunId};
pub use outcome::{ExecutionReport, Outcome, StoredResult, TaskResult};
pub use task::{Method, NewTask, RESERVED_FIELDS, Task, TaskParameters, TaskStatus};
