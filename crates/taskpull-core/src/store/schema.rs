//! SQLite schema of a queue file.
//!
//! `todolist` holds one row per task, `diagnostics` one row per finished
//! task. Priority is the rowid, so it is unique and indexed for free.

pub(crate) const TODOLIST: &str = r#"
    CREATE TABLE IF NOT EXISTS todolist (
        priority INTEGER PRIMARY KEY,
        target_id INTEGER NOT NULL,
        method TEXT DEFAULT NULL,
        parameters TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'pending',
        started_at TEXT,
        finished_at TEXT
    );
    CREATE INDEX IF NOT EXISTS status_idx ON todolist (status);
    CREATE INDEX IF NOT EXISTS target_id_idx ON todolist (target_id);
"#;

pub(crate) const DIAGNOSTICS: &str = r#"
    CREATE TABLE IF NOT EXISTS diagnostics (
        priority INTEGER PRIMARY KEY REFERENCES todolist (priority),
        outcome TEXT NOT NULL,
        elapsed_time REAL NOT NULL,
        details TEXT NOT NULL DEFAULT '{}',
        finished_at TEXT NOT NULL
    );
"#;

/// Columns read back into a `Task`, in order.
pub(crate) const TASK_COLUMNS: &str = "priority, target_id, method, parameters, status";

/// Columns read back into a `StoredResult`, in order.
pub(crate) const RESULT_COLUMNS: &str = "priority, outcome, elapsed_time, details, finished_at";
