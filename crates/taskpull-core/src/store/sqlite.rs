//! SQLite task store on top of libSQL.
//!
//! One connection per store, guarded by a mutex: every read-modify-write runs
//! as a single statement or a single transaction while the lock is held, and
//! SQLite's own write lock covers out-of-band writers on the same file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Database, Value as SqlValue, params};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::schema;
use crate::domain::{
    Method, NewTask, Outcome, Priority, StoredResult, Task, TaskParameters, TaskResult,
    TaskStatus,
};
use crate::error::StoreError;
use crate::observability::StatusCounts;
use crate::ports::TaskStore;

/// Durable `TaskStore` backed by a single SQLite file.
pub struct SqliteTaskStore {
    path: PathBuf,
    /// Owns the database the connection was opened from; never read, but
    /// dropping it would close the file under `conn`.
    #[allow(dead_code)]
    db: Database,
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Open an existing queue file.
    ///
    /// A missing file is a setup error: no new store is created behind the
    /// caller's back.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let store = Self::connect(path).await?;
        {
            let conn = store.conn.lock().await;
            if !has_table(&conn, "todolist").await? {
                return Err(StoreError::MissingSchema(path.to_path_buf()));
            }
            // queue files written by older builders only carry the todolist
            conn.execute_batch(schema::DIAGNOSTICS).await?;
        }

        info!(path = %path.display(), "task store opened");
        Ok(store)
    }

    /// Create a new, empty queue file. Refuses to overwrite an existing one.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self::connect(path).await?;
        store.init_schema().await?;
        info!(path = %path.display(), "task store created");
        Ok(store)
    }

    /// Create an in-memory store (for tests).
    pub async fn memory() -> Result<Self, StoreError> {
        let store = Self::connect(Path::new(":memory:")).await?;
        store.init_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(path: &Path) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        Ok(Self {
            path: path.to_path_buf(),
            db,
            conn: Mutex::new(conn),
        })
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(schema::TODOLIST).await?;
        conn.execute_batch(schema::DIAGNOSTICS).await?;
        Ok(())
    }

    async fn count(&self, sql: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn.query(sql, ()).await?;
        let n: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(n).unwrap_or_default())
    }
}

// ── Helper functions ────────────────────────────────────────────────

async fn has_table(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
        )
        .await?;
    let n: i64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0,
    };
    Ok(n > 0)
}

async fn current_status(
    conn: &Connection,
    priority: Priority,
) -> Result<Option<TaskStatus>, StoreError> {
    let mut rows = conn
        .query(
            "SELECT status FROM todolist WHERE priority = ?1",
            params![priority.get()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => {
            let status: String = row.get(0)?;
            Ok(Some(status.parse().map_err(StoreError::CorruptRow)?))
        }
        None => Ok(None),
    }
}

async fn query_task(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
) -> Result<Option<Task>, StoreError> {
    let mut rows = conn.query(sql, params).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_task(&row)?)),
        None => Ok(None),
    }
}

/// Map a row to a Task. Column order matches `schema::TASK_COLUMNS`.
fn row_to_task(row: &libsql::Row) -> Result<Task, StoreError> {
    let priority: i64 = row.get(0)?;
    let target_id: i64 = row.get(1)?;
    let method = match row.get_value(2)? {
        SqlValue::Null => None,
        SqlValue::Text(s) if s.trim().is_empty() => None,
        SqlValue::Text(s) => Some(s.parse::<Method>().map_err(StoreError::CorruptRow)?),
        other => {
            return Err(StoreError::CorruptRow(format!(
                "priority={priority}: method column holds {other:?}"
            )));
        }
    };
    let parameters: String = row.get(3)?;
    let extra: Map<String, Value> = serde_json::from_str(&parameters)?;
    let status: String = row.get(4)?;

    Ok(Task {
        priority: Priority::new(priority),
        status: status.parse().map_err(StoreError::CorruptRow)?,
        parameters: TaskParameters {
            target_id,
            method,
            extra,
        },
    })
}

/// Map a row to a StoredResult. Column order matches `schema::RESULT_COLUMNS`.
fn row_to_result(row: &libsql::Row) -> Result<StoredResult, StoreError> {
    let priority: i64 = row.get(0)?;
    let outcome: String = row.get(1)?;
    let elapsed_time: f64 = row.get(2)?;
    let details: String = row.get(3)?;
    let finished_at: String = row.get(4)?;

    Ok(StoredResult {
        priority: Priority::new(priority),
        status: outcome.parse::<Outcome>().map_err(StoreError::CorruptRow)?,
        elapsed_time,
        details: serde_json::from_str(&details)?,
        finished_at: DateTime::parse_from_rfc3339(&finished_at)
            .map_err(|e| StoreError::CorruptRow(format!("finished_at '{finished_at}': {e}")))?
            .with_timezone(&Utc),
    })
}

fn opt_method(method: Option<Method>) -> SqlValue {
    match method {
        Some(m) => SqlValue::Text(m.as_str().to_string()),
        None => SqlValue::Null,
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn count_pending(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM todolist WHERE status IN ('pending', 'running')")
            .await
    }

    async fn count_total(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM todolist").await
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT status, COUNT(*) FROM todolist GROUP BY status", ())
            .await?;
        let mut counts = StatusCounts::default();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            let status: TaskStatus = status.parse().map_err(StoreError::CorruptRow)?;
            counts.add(status, u64::try_from(n).unwrap_or_default());
        }
        Ok(counts)
    }

    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        // select + transition in one statement: no window for a second claimer
        let sql = format!(
            "UPDATE todolist SET status = 'running', started_at = ?1
             WHERE priority = (
                 SELECT priority FROM todolist WHERE status = 'pending'
                 ORDER BY priority LIMIT 1
             )
             RETURNING {}",
            schema::TASK_COLUMNS
        );
        let task = query_task(&conn, &sql, params![now]).await?;
        if let Some(task) = &task {
            debug!(priority = %task.priority, target_id = task.target_id(), "task claimed");
        }
        Ok(task)
    }

    async fn mark_running(&self, priority: Priority) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE todolist SET status = 'running', started_at = ?1
                 WHERE priority = ?2 AND status = 'pending'",
                params![Utc::now().to_rfc3339(), priority.get()],
            )
            .await?;
        if changed > 0 {
            return Ok(());
        }
        match current_status(&conn, priority).await? {
            None => Err(StoreError::UnknownTask(priority)),
            Some(TaskStatus::Pending | TaskStatus::Running) => Ok(()),
            Some(TaskStatus::Done | TaskStatus::Error) => {
                Err(StoreError::AlreadyFinished(priority))
            }
        }
    }

    async fn complete(&self, priority: Priority, result: &TaskResult) -> Result<(), StoreError> {
        let status = result.status.store_status();
        let details = serde_json::to_string(&result.details)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;
        let changed = tx
            .execute(
                "UPDATE todolist SET status = ?1, finished_at = ?2
                 WHERE priority = ?3 AND status = 'running'",
                params![status.as_str(), now.clone(), priority.get()],
            )
            .await?;
        if changed == 0 {
            tx.rollback().await?;
            return Err(match current_status(&conn, priority).await? {
                None => StoreError::UnknownTask(priority),
                Some(status) => StoreError::NotRunning { priority, status },
            });
        }
        tx.execute(
            "INSERT OR REPLACE INTO diagnostics (priority, outcome, elapsed_time, details, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                priority.get(),
                result.status.as_str(),
                result.elapsed_time,
                details,
                now
            ],
        )
        .await?;
        tx.commit().await?;

        debug!(%priority, outcome = %result.status, %status, "task completed");
        Ok(())
    }

    async fn get(&self, priority: Priority) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM todolist WHERE priority = ?1",
            schema::TASK_COLUMNS
        );
        query_task(&conn, &sql, params![priority.get()]).await
    }

    async fn get_result(&self, priority: Priority) -> Result<Option<StoredResult>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM diagnostics WHERE priority = ?1",
            schema::RESULT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![priority.get()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_result(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_random_pending(&self) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM todolist WHERE status = 'pending'
             ORDER BY RANDOM() LIMIT 1",
            schema::TASK_COLUMNS
        );
        query_task(&conn, &sql, ()).await
    }

    async fn reset_running(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let moved = conn
            .execute(
                "UPDATE todolist SET status = 'pending', started_at = NULL WHERE status = 'running'",
                (),
            )
            .await?;
        info!(moved, "running tasks reset to pending");
        Ok(moved)
    }

    async fn insert_tasks(&self, tasks: &[NewTask]) -> Result<(), StoreError> {
        for new in tasks {
            new.validate()?;
        }
        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;
        for new in tasks {
            if current_status(&tx, new.priority).await?.is_some() {
                tx.rollback().await?;
                return Err(StoreError::DuplicatePriority(new.priority));
            }
            let parameters = serde_json::to_string(&new.parameters.extra)?;
            tx.execute(
                "INSERT INTO todolist (priority, target_id, method, parameters, status)
                 VALUES (?1, ?2, ?3, ?4, 'pending')",
                params![
                    new.priority.get(),
                    new.parameters.target_id,
                    opt_method(new.parameters.method),
                    parameters
                ],
            )
            .await?;
        }
        tx.commit().await?;
        debug!(count = tasks.len(), "tasks inserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionReport;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn store_with(priorities: &[i64]) -> SqliteTaskStore {
        let store = SqliteTaskStore::memory().await.unwrap();
        let tasks: Vec<NewTask> = priorities
            .iter()
            .map(|&p| {
                NewTask::new(
                    p,
                    TaskParameters::new(1000 + p)
                        .with_field("sector", 1)
                        .with_field("datasource", "ffi"),
                )
            })
            .collect();
        store.insert_tasks(&tasks).await.unwrap();
        store
    }

    fn ok_result(task: &Task, details: Map<String, Value>) -> TaskResult {
        let mut report = ExecutionReport::ok();
        report.details = details;
        TaskResult::new(
            task.priority,
            task.parameters.clone(),
            report,
            Duration::from_millis(1230),
        )
    }

    #[tokio::test]
    async fn open_missing_file_is_a_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteTaskStore::open(dir.path().join("todo.sqlite"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todo.sqlite");
        drop(SqliteTaskStore::create(&path).await.unwrap());
        let err = SqliteTaskStore::create(&path).await.err().unwrap();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("todo.sqlite");
        {
            let store = SqliteTaskStore::create(&path).await.unwrap();
            store
                .insert_tasks(&[
                    NewTask::new(1, TaskParameters::new(11)),
                    NewTask::new(2, TaskParameters::new(22)),
                ])
                .await
                .unwrap();
            let task = store.claim_next().await.unwrap().unwrap();
            store
                .complete(task.priority, &ok_result(&task, Map::new()))
                .await
                .unwrap();
        }

        let store = SqliteTaskStore::open(&path).await.unwrap();
        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(store.count_total().await.unwrap(), 2);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claims_are_unique_and_monotonic() {
        let store = store_with(&[5, 3, 1, 4, 2]).await;

        let mut claimed = Vec::new();
        while let Some(task) = store.claim_next().await.unwrap() {
            assert_eq!(task.status, TaskStatus::Running);
            claimed.push(task.priority.get());
            store
                .complete(task.priority, &ok_result(&task, Map::new()))
                .await
                .unwrap();
        }
        assert_eq!(claimed, vec![1, 2, 3, 4, 5]);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn running_task_is_not_claimed_again() {
        let store = store_with(&[1, 2]).await;
        let a = store.claim_next().await.unwrap().unwrap();
        let b = store.claim_next().await.unwrap().unwrap();
        assert_ne!(a.priority, b.priority);
        assert!(store.claim_next().await.unwrap().is_none());
        assert_eq!(store.count_pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn round_trip_preserves_details() {
        let store = store_with(&[1]).await;
        let task = store.claim_next().await.unwrap().unwrap();
        assert_eq!(task.target_id(), 1001);
        assert_eq!(task.parameters.field("datasource"), Some(&json!("ffi")));

        let details = json!({"flux": [1.0, 2.5], "contamination": 0.1, "note": "ok"});
        let details = details.as_object().unwrap().clone();
        store
            .complete(task.priority, &ok_result(&task, details.clone()))
            .await
            .unwrap();

        let stored = store.get(task.priority).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Done);

        let result = store.get_result(task.priority).await.unwrap().unwrap();
        assert_eq!(result.status, Outcome::Ok);
        assert_eq!(result.details, details);
        assert!((result.elapsed_time - 1.23).abs() < 1e-9);
    }

    #[tokio::test]
    async fn second_completion_is_a_no_op() {
        let store = store_with(&[1]).await;
        let task = store.claim_next().await.unwrap().unwrap();
        let first = json!({"run": 1}).as_object().unwrap().clone();
        store
            .complete(task.priority, &ok_result(&task, first.clone()))
            .await
            .unwrap();

        let mut second = ok_result(&task, json!({"run": 2}).as_object().unwrap().clone());
        second.status = Outcome::Fatal;
        let err = store.complete(task.priority, &second).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotRunning { status: TaskStatus::Done, .. }
        ));

        let result = store.get_result(task.priority).await.unwrap().unwrap();
        assert_eq!(result.details, first);
        assert_eq!(result.status, Outcome::Ok);
        assert_eq!(
            store.get(task.priority).await.unwrap().unwrap().status,
            TaskStatus::Done
        );
    }

    #[tokio::test]
    async fn completing_an_unknown_priority_fails() {
        let store = store_with(&[1]).await;
        let task = store.get(Priority::new(1)).await.unwrap().unwrap();
        let err = store
            .complete(Priority::new(99), &ok_result(&task, Map::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownTask(p) if p == Priority::new(99)));
        assert!(err.is_stale_completion());
    }

    #[tokio::test]
    async fn fatal_outcome_is_stored_as_error() {
        let store = store_with(&[1]).await;
        let task = store.claim_next().await.unwrap().unwrap();
        let mut result = ok_result(&task, Map::new());
        result.status = Outcome::Fatal;
        store.complete(task.priority, &result).await.unwrap();

        assert_eq!(
            store.get(task.priority).await.unwrap().unwrap().status,
            TaskStatus::Error
        );
        assert_eq!(
            store.get_result(task.priority).await.unwrap().unwrap().status,
            Outcome::Fatal
        );
    }

    #[tokio::test]
    async fn concurrent_claims_on_a_single_task() {
        let store = Arc::new(store_with(&[1]).await);

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.claim_next().await.unwrap() }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.claim_next().await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
        assert_eq!(store.counts_by_status().await.unwrap().running, 1);
    }

    #[tokio::test]
    async fn mark_running_is_idempotent() {
        let store = store_with(&[1, 2]).await;
        store.mark_running(Priority::new(2)).await.unwrap();
        store.mark_running(Priority::new(2)).await.unwrap();
        assert_eq!(
            store.get(Priority::new(2)).await.unwrap().unwrap().status,
            TaskStatus::Running
        );

        let next = store.claim_next().await.unwrap().unwrap();
        assert_eq!(next.priority, Priority::new(1));
        assert!(matches!(
            store.mark_running(Priority::new(7)).await,
            Err(StoreError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn random_pick_leaves_status_untouched() {
        let store = store_with(&[1, 2, 3]).await;
        let picked = store.get_random_pending().await.unwrap().unwrap();
        assert!((1..=3).contains(&picked.priority.get()));
        assert_eq!(store.counts_by_status().await.unwrap().pending, 3);

        let empty = SqliteTaskStore::memory().await.unwrap();
        assert!(empty.get_random_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_priorities_roll_back_the_batch() {
        let store = store_with(&[1]).await;
        let err = store
            .insert_tasks(&[
                NewTask::new(2, TaskParameters::new(2)),
                NewTask::new(1, TaskParameters::new(1)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePriority(p) if p == Priority::new(1)));
        assert_eq!(store.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn parameters_shadowing_task_fields_are_rejected() {
        let store = store_with(&[1]).await;
        let err = store
            .insert_tasks(&[
                NewTask::new(2, TaskParameters::new(2)),
                NewTask::new(3, TaskParameters::new(3).with_field("priority", 2)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::ReservedField { priority, field: "priority" } if priority == Priority::new(3)
        ));
        assert_eq!(store.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn random_pick_finds_the_last_pending_task() {
        let store = store_with(&[1, 2, 3]).await;
        store.claim_next().await.unwrap();
        store.claim_next().await.unwrap();
        for _ in 0..10 {
            let picked = store.get_random_pending().await.unwrap().unwrap();
            assert_eq!(picked.priority, Priority::new(3));
        }
    }

    #[tokio::test]
    async fn method_column_round_trips() {
        let store = SqliteTaskStore::memory().await.unwrap();
        store
            .insert_tasks(&[NewTask::new(
                1,
                TaskParameters::new(5).with_method(Method::Linpsf),
            )])
            .await
            .unwrap();
        let task = store.claim_next().await.unwrap().unwrap();
        assert_eq!(task.parameters.method, Some(Method::Linpsf));
    }

    #[tokio::test]
    async fn reset_running_returns_tasks_to_the_queue() {
        let store = store_with(&[1, 2, 3]).await;
        store.claim_next().await.unwrap();
        store.claim_next().await.unwrap();
        assert_eq!(store.reset_running().await.unwrap(), 2);
        let again = store.claim_next().await.unwrap().unwrap();
        assert_eq!(again.priority, Priority::new(1));
    }
}
