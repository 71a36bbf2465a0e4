//! In-memory task store implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::IteratorRandom;
use tokio::sync::Mutex;

use crate::domain::{NewTask, Priority, StoredResult, Task, TaskResult, TaskStatus};
use crate::error::StoreError;
use crate::observability::StatusCounts;
use crate::ports::TaskStore;

/// Task + its result, if any.
#[derive(Debug, Clone)]
struct TaskRecord {
    task: Task,
    result: Option<StoredResult>,
}

/// In-memory store state.
///
/// Records are keyed by priority, so iteration order is dispatch order.
#[derive(Debug, Default)]
struct InMemoryState {
    records: BTreeMap<Priority, TaskRecord>,
}

impl InMemoryState {
    fn counts_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.records.values() {
            counts.add(record.task.status, 1);
        }
        counts
    }

    fn pending(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records
            .values()
            .filter(|r| r.task.status == TaskStatus::Pending)
    }
}

/// Non-durable `TaskStore`, for tests and embedding.
///
/// All operations run under one lock, so every transition is atomic.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-filled with pending tasks.
    pub fn with_tasks(tasks: impl IntoIterator<Item = NewTask>) -> Result<Self, StoreError> {
        let mut state = InMemoryState::default();
        for new in tasks {
            insert(&mut state, new)?;
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }
}

fn insert(state: &mut InMemoryState, new: NewTask) -> Result<(), StoreError> {
    new.validate()?;
    if state.records.contains_key(&new.priority) {
        return Err(StoreError::DuplicatePriority(new.priority));
    }
    let task = Task {
        priority: new.priority,
        status: TaskStatus::Pending,
        parameters: new.parameters,
    };
    state
        .records
        .insert(new.priority, TaskRecord { task, result: None });
    Ok(())
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn count_pending(&self) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.counts_by_status().remaining())
    }

    async fn count_total(&self) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.len() as u64)
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let state = self.state.lock().await;
        Ok(state.counts_by_status())
    }

    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(priority) = state.pending().next().map(|r| r.task.priority) else {
            return Ok(None);
        };
        let record = state
            .records
            .get_mut(&priority)
            .ok_or(StoreError::UnknownTask(priority))?;
        record.task.status = TaskStatus::Running;
        Ok(Some(record.task.clone()))
    }

    async fn mark_running(&self, priority: Priority) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(&priority)
            .ok_or(StoreError::UnknownTask(priority))?;
        match record.task.status {
            TaskStatus::Pending => {
                record.task.status = TaskStatus::Running;
                Ok(())
            }
            TaskStatus::Running => Ok(()),
            TaskStatus::Done | TaskStatus::Error => Err(StoreError::AlreadyFinished(priority)),
        }
    }

    async fn complete(&self, priority: Priority, result: &TaskResult) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(&priority)
            .ok_or(StoreError::UnknownTask(priority))?;
        if record.task.status != TaskStatus::Running {
            return Err(StoreError::NotRunning {
                priority,
                status: record.task.status,
            });
        }
        record.task.status = result.status.store_status();
        record.result = Some(StoredResult {
            priority,
            status: result.status,
            elapsed_time: result.elapsed_time,
            details: result.details.clone(),
            finished_at: Utc::now(),
        });
        Ok(())
    }

    async fn get(&self, priority: Priority) -> Result<Option<Task>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&priority).map(|r| r.task.clone()))
    }

    async fn get_result(&self, priority: Priority) -> Result<Option<StoredResult>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&priority).and_then(|r| r.result.clone()))
    }

    async fn get_random_pending(&self) -> Result<Option<Task>, StoreError> {
        let state = self.state.lock().await;
        let mut rng = rand::thread_rng();
        Ok(state.pending().choose(&mut rng).map(|r| r.task.clone()))
    }

    async fn reset_running(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut moved = 0;
        for record in state.records.values_mut() {
            if record.task.status == TaskStatus::Running {
                record.task.status = TaskStatus::Pending;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn insert_tasks(&self, tasks: &[NewTask]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        // 全件検証してから入れる (all-or-nothing)
        for (i, new) in tasks.iter().enumerate() {
            new.validate()?;
            if state.records.contains_key(&new.priority)
                || tasks[..i].iter().any(|t| t.priority == new.priority)
            {
                return Err(StoreError::DuplicatePriority(new.priority));
            }
        }
        for new in tasks {
            insert(&mut state, new.clone())?;
        }
        Ok(())
    }
}
