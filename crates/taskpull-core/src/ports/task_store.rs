//! TaskStore port - the source of truth for task state.

use async_trait::async_trait;

use crate::domain::{NewTask, Priority, StoredResult, Task, TaskResult};
use crate::error::StoreError;
use crate::observability::StatusCounts;

/// Persistent priority queue of tasks.
///
/// # Design
/// - State transitions (claim / complete) are single atomic writes; a task is
///   never observed half-written.
/// - `claim_next` is safe under concurrent callers: two claims never return
///   the same task.
/// - Methods take `&self`; implementations serialize writes internally.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Tasks not yet completed or errored (pending + running).
    async fn count_pending(&self) -> Result<u64, StoreError>;

    async fn count_total(&self) -> Result<u64, StoreError>;

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError>;

    /// Move the lowest-priority pending task to running and return it.
    /// `None` means the queue is exhausted.
    async fn claim_next(&self) -> Result<Option<Task>, StoreError>;

    /// Pending -> Running for a task that was selected without `claim_next`.
    /// No-op if the task is already running.
    async fn mark_running(&self, priority: Priority) -> Result<(), StoreError>;

    /// Running -> Done/Error, persisting the result in the same write.
    /// Fails without side effects if the task is not running.
    async fn complete(&self, priority: Priority, result: &TaskResult) -> Result<(), StoreError>;

    async fn get(&self, priority: Priority) -> Result<Option<Task>, StoreError>;

    async fn get_result(&self, priority: Priority) -> Result<Option<StoredResult>, StoreError>;

    /// Uniform random pick among pending tasks. Read-only.
    async fn get_random_pending(&self) -> Result<Option<Task>, StoreError>;

    /// Running -> Pending for every task, returning how many moved.
    /// Recovery for runs whose controller died; never used by the scheduling loop.
    async fn reset_running(&self) -> Result<u64, StoreError>;

    /// Bulk insert of pending tasks in a single transaction.
    async fn insert_tasks(&self, tasks: &[NewTask]) -> Result<(), StoreError>;
}
