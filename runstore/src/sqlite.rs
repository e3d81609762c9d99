//! SQLite checkpoint backend
//!
//! A single database file in WAL mode with two tables: `checkpoints`
//! (snapshot blobs keyed by run_id+thread_id) and `runs` (summary rows for
//! list views). Upsert semantics on both.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::backend::{CheckpointBackend, CheckpointKey, RunPage, RunSummary};
use crate::PersistError;

/// SQLite-backed checkpoint store
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "SqliteBackend::open: called");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                run_id     TEXT NOT NULL,
                thread_id  TEXT NOT NULL,
                snapshot   BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (run_id, thread_id)
            );
            CREATE TABLE IF NOT EXISTS runs (
                run_id           TEXT PRIMARY KEY,
                thread_id        TEXT NOT NULL,
                objective        TEXT NOT NULL,
                status           TEXT NOT NULL,
                workspace_path   TEXT NOT NULL,
                task_counts_json TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_updated_at ON runs(updated_at);",
        )?;

        info!(path = %path.display(), "Opened SQLite checkpoint store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE checkpoints (
                run_id     TEXT NOT NULL,
                thread_id  TEXT NOT NULL,
                snapshot   BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (run_id, thread_id)
            );
            CREATE TABLE runs (
                run_id           TEXT PRIMARY KEY,
                thread_id        TEXT NOT NULL,
                objective        TEXT NOT NULL,
                status           TEXT NOT NULL,
                workspace_path   TEXT NOT NULL,
                task_counts_json TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl CheckpointBackend for SqliteBackend {
    fn put(&self, key: &CheckpointKey, snapshot: &[u8], summary: &RunSummary) -> Result<(), PersistError> {
        debug!(%key, bytes = snapshot.len(), "SqliteBackend::put: called");
        let mut conn = self.conn.lock().expect("connection lock poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO checkpoints (run_id, thread_id, snapshot, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id, thread_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at",
            params![key.run_id, key.thread_id, snapshot, summary.updated_at],
        )?;

        tx.execute(
            "INSERT INTO runs (run_id, thread_id, objective, status, workspace_path,
                               task_counts_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(run_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                objective = excluded.objective,
                status = excluded.status,
                workspace_path = excluded.workspace_path,
                task_counts_json = excluded.task_counts_json,
                updated_at = excluded.updated_at",
            params![
                summary.run_id,
                summary.thread_id,
                summary.objective,
                summary.status,
                summary.workspace_path,
                summary.task_counts.to_string(),
                summary.created_at,
                summary.updated_at,
            ],
        )?;

        tx.commit()?;
        debug!(%key, "SqliteBackend::put: committed");
        Ok(())
    }

    fn get(&self, key: &CheckpointKey) -> Result<Option<Vec<u8>>, PersistError> {
        debug!(%key, "SqliteBackend::get: called");
        let conn = self.conn.lock().expect("connection lock poisoned");
        let snapshot = conn
            .query_row(
                "SELECT snapshot FROM checkpoints WHERE run_id = ?1 AND thread_id = ?2",
                params![key.run_id, key.thread_id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(snapshot)
    }

    fn delete(&self, key: &CheckpointKey) -> Result<(), PersistError> {
        debug!(%key, "SqliteBackend::delete: called");
        let mut conn = self.conn.lock().expect("connection lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM checkpoints WHERE run_id = ?1 AND thread_id = ?2",
            params![key.run_id, key.thread_id],
        )?;
        tx.execute("DELETE FROM runs WHERE run_id = ?1", params![key.run_id])?;
        tx.commit()?;
        Ok(())
    }

    fn list_runs(&self, limit: usize, offset: usize) -> Result<RunPage, PersistError> {
        debug!(limit, offset, "SqliteBackend::list_runs: called");
        let conn = self.conn.lock().expect("connection lock poisoned");

        let total: usize = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get::<_, i64>(0))? as usize;

        let mut stmt = conn.prepare(
            "SELECT run_id, thread_id, objective, status, workspace_path,
                    task_counts_json, created_at, updated_at
             FROM runs ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )?;

        let items = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                let counts: String = row.get(5)?;
                Ok(RunSummary {
                    run_id: row.get(0)?,
                    thread_id: row.get(1)?,
                    objective: row.get(2)?,
                    status: row.get(3)?,
                    workspace_path: row.get(4)?,
                    task_counts: serde_json::from_str(&counts).unwrap_or(serde_json::Value::Null),
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = offset + items.len() < total;
        Ok(RunPage { items, total, has_more })
    }

    fn get_summary(&self, run_id: &str) -> Result<Option<RunSummary>, PersistError> {
        debug!(%run_id, "SqliteBackend::get_summary: called");
        let conn = self.conn.lock().expect("connection lock poisoned");
        let summary = conn
            .query_row(
                "SELECT run_id, thread_id, objective, status, workspace_path,
                        task_counts_json, created_at, updated_at
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    let counts: String = row.get(5)?;
                    Ok(RunSummary {
                        run_id: row.get(0)?,
                        thread_id: row.get(1)?,
                        objective: row.get(2)?,
                        status: row.get(3)?,
                        workspace_path: row.get(4)?,
                        task_counts: serde_json::from_str(&counts).unwrap_or(serde_json::Value::Null),
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }
}
