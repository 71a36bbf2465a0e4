//! TaskManager - the single gateway to the task store during a run.
//!
//! The manager owns its store: acquiring the manager opens the store and
//! dropping it (on return, on `?`, on panic unwinding) releases it.

use std::path::Path;

use tracing::{Span, debug, info, info_span, warn};

use crate::domain::{Priority, StoredResult, Task, TaskResult};
use crate::error::StoreError;
use crate::observability::StatusCounts;
use crate::ports::TaskStore;
use crate::store::SqliteTaskStore;

pub struct TaskManager<S: TaskStore = SqliteTaskStore> {
    store: S,
    span: Span,
}

impl TaskManager<SqliteTaskStore> {
    /// Open the queue file at `path`. Fails if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let store = SqliteTaskStore::open(path).await?;
        let span = info_span!("task_manager", path = %path.display());
        Ok(Self::with_span(store, span))
    }
}

impl<S: TaskStore> TaskManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_span(store, info_span!("task_manager"))
    }

    /// Use `span` as the parent of everything this manager logs.
    pub fn with_span(store: S, span: Span) -> Self {
        Self { store, span }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn count_pending(&self) -> Result<u64, StoreError> {
        self.store.count_pending().await
    }

    pub async fn count_total(&self) -> Result<u64, StoreError> {
        self.store.count_total().await
    }

    pub async fn counts(&self) -> Result<StatusCounts, StoreError> {
        self.store.counts_by_status().await
    }

    /// Claim the next task for dispatch (pending -> running).
    pub async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        self.store.claim_next().await
    }

    /// Called right before a task is handed to a worker.
    ///
    /// The claim has normally done the transition already; this keeps the
    /// store consistent when a task was selected some other way.
    pub async fn start_task(&self, priority: Priority) -> Result<(), StoreError> {
        debug!(parent: &self.span, %priority, "starting task");
        self.store.mark_running(priority).await
    }

    /// Record a worker's result.
    ///
    /// A stale completion (unknown task, or not running) is logged and
    /// dropped so one bad report cannot abort the run. Other store failures
    /// are returned.
    pub async fn save_result(&self, result: &TaskResult) -> Result<(), StoreError> {
        match self.store.complete(result.priority, result).await {
            Ok(()) => {
                debug!(
                    parent: &self.span,
                    priority = %result.priority,
                    status = %result.status,
                    elapsed = result.elapsed_time,
                    "result saved"
                );
                Ok(())
            }
            Err(err) if err.is_stale_completion() => {
                warn!(
                    parent: &self.span,
                    priority = %result.priority,
                    error = %err,
                    "ignoring stale result"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_random_task(&self) -> Result<Option<Task>, StoreError> {
        self.store.get_random_pending().await
    }

    pub async fn get_result(&self, priority: Priority) -> Result<Option<StoredResult>, StoreError> {
        self.store.get_result(priority).await
    }

    /// Put tasks stranded in `running` by a dead controller back in the queue.
    pub async fn reset_running(&self) -> Result<u64, StoreError> {
        self.store.reset_running().await
    }

    /// Release the store explicitly, logging the final counts.
    pub async fn close(self) -> Result<StatusCounts, StoreError> {
        let counts = self.store.counts_by_status().await?;
        info!(parent: &self.span, %counts, "task store closed");
        Ok(counts)
    }
}

impl<S: TaskStore> Drop for TaskManager<S> {
    fn drop(&mut self) {
        debug!(parent: &self.span, "task store released");
    }
}
