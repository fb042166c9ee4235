//! SQLite-backed store.
//!
//! Each table keeps the full record as JSON next to the columns used for
//! lookups and compare-and-swap guards. Multi-record operations run in a
//! single transaction.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use super::{ensure_resolvable, Checkpoint, Resolution, ReviewItem, ReviewState, RunRecord, RunStore};
use crate::errors::{InvoiceflowError, Result};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS runs (
        run_id TEXT PRIMARY KEY,
        current_stage TEXT NOT NULL,
        status TEXT NOT NULL,
        revision INTEGER NOT NULL,
        record TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS checkpoints (
        checkpoint_id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL REFERENCES runs(run_id),
        revision INTEGER NOT NULL,
        resolved INTEGER NOT NULL DEFAULT 0,
        record TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (run_id, revision)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_checkpoints_active
        ON checkpoints(run_id) WHERE resolved = 0;
    CREATE TABLE IF NOT EXISTS review_items (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        review_id TEXT NOT NULL UNIQUE,
        run_id TEXT NOT NULL REFERENCES runs(run_id),
        checkpoint_id TEXT NOT NULL UNIQUE REFERENCES checkpoints(checkpoint_id),
        status TEXT NOT NULL,
        record TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_review_items_status ON review_items(status);
";

fn to_i64(revision: u64) -> Result<i64> {
    i64::try_from(revision).map_err(|_| InvoiceflowError::store(format!("revision {revision} out of range")))
}

fn from_i64(revision: i64) -> Result<u64> {
    u64::try_from(revision).map_err(|_| InvoiceflowError::store(format!("negative revision {revision}")))
}

fn read_run(conn: &Connection, run_id: Uuid) -> Result<Option<RunRecord>> {
    let record: Option<String> = conn
        .query_row(
            "SELECT record FROM runs WHERE run_id = ?1",
            params![run_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    record
        .map(|json| serde_json::from_str(&json).map_err(InvoiceflowError::from))
        .transpose()
}

fn read_checkpoint(conn: &Connection, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
    let record: Option<String> = conn
        .query_row(
            "SELECT record FROM checkpoints WHERE checkpoint_id = ?1",
            params![checkpoint_id],
            |row| row.get(0),
        )
        .optional()?;
    record
        .map(|json| serde_json::from_str(&json).map_err(InvoiceflowError::from))
        .transpose()
}

fn read_review(conn: &Connection, column: &str, key: &str) -> Result<Option<ReviewItem>> {
    let sql = format!("SELECT record FROM review_items WHERE {column} = ?1");
    let record: Option<String> = conn
        .query_row(&sql, params![key], |row| row.get(0))
        .optional()?;
    record
        .map(|json| serde_json::from_str(&json).map_err(InvoiceflowError::from))
        .transpose()
}

fn write_run(conn: &Connection, run: &RunRecord, expected_revision: u64) -> Result<()> {
    let mut stored = run.clone();
    stored.updated_at = Utc::now();
    let updated = conn.execute(
        "UPDATE runs
            SET current_stage = ?1, status = ?2, revision = ?3, record = ?4, updated_at = ?5
          WHERE run_id = ?6 AND revision = ?7",
        params![
            stored.current_stage.as_str(),
            stored.status.as_str(),
            to_i64(stored.revision)?,
            serde_json::to_string(&stored)?,
            stored.updated_at.to_rfc3339(),
            stored.run_id.to_string(),
            to_i64(expected_revision)?,
        ],
    )?;
    if updated == 1 {
        return Ok(());
    }

    let found: Option<i64> = conn
        .query_row(
            "SELECT revision FROM runs WHERE run_id = ?1",
            params![run.run_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        None => Err(InvoiceflowError::not_found("run", run.run_id.to_string())),
        Some(found) => Err(InvoiceflowError::RevisionConflict {
            run_id: run.run_id.to_string(),
            expected: expected_revision,
            found: from_i64(found)?,
        }),
    }
}

fn set_checkpoint_resolved(conn: &Connection, checkpoint: &Checkpoint) -> Result<()> {
    let mut resolved = checkpoint.clone();
    resolved.resolved = true;
    resolved.resolved_at = Some(Utc::now());
    conn.execute(
        "UPDATE checkpoints SET resolved = 1, record = ?2 WHERE checkpoint_id = ?1",
        params![resolved.checkpoint_id, serde_json::to_string(&resolved)?],
    )?;
    Ok(())
}

/// Store backed by a SQLite database.
#[derive(Debug)]
pub struct SqliteStore {
    path: String,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns a store error if the file cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| InvoiceflowError::store(format!("{}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn, path.display().to_string())
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a store error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:".to_string())
    }

    fn init(conn: Connection, path: String) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path, "Opened SQLite store");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Database location.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl RunStore for SqliteStore {
    fn insert_run(&self, run: &RunRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (run_id, current_stage, status, revision, record, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id.to_string(),
                run.current_stage.as_str(),
                run.status.as_str(),
                to_i64(run.revision)?,
                serde_json::to_string(run)?,
                run.created_at.to_rfc3339(),
                run.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_run(&self, run_id: Uuid) -> Result<RunRecord> {
        read_run(&self.conn.lock(), run_id)?
            .ok_or_else(|| InvoiceflowError::not_found("run", run_id.to_string()))
    }

    fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT record FROM runs ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(serde_json::from_str(&row?)?);
        }
        Ok(runs)
    }

    fn commit_run(&self, run: &RunRecord, expected_revision: u64) -> Result<()> {
        write_run(&self.conn.lock(), run, expected_revision)
    }

    fn suspend_run(
        &self,
        run: &RunRecord,
        expected_revision: u64,
        checkpoint: &Checkpoint,
        review: &ReviewItem,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let active: Option<String> = tx
            .query_row(
                "SELECT checkpoint_id FROM checkpoints WHERE run_id = ?1 AND resolved = 0",
                params![run.run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(checkpoint_id) = active {
            return Err(InvoiceflowError::ActiveCheckpointExists {
                run_id: run.run_id.to_string(),
                checkpoint_id,
            });
        }

        write_run(&tx, run, expected_revision)?;
        tx.execute(
            "INSERT INTO checkpoints (checkpoint_id, run_id, revision, resolved, record, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            params![
                checkpoint.checkpoint_id,
                checkpoint.run_id.to_string(),
                to_i64(checkpoint.revision)?,
                serde_json::to_string(checkpoint)?,
                checkpoint.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "INSERT INTO review_items (review_id, run_id, checkpoint_id, status, record, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                review.review_id,
                review.run_id.to_string(),
                review.checkpoint_id,
                review.state.as_str(),
                serde_json::to_string(review)?,
                review.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        read_checkpoint(&self.conn.lock(), checkpoint_id)?
            .ok_or_else(|| InvoiceflowError::not_found("checkpoint", checkpoint_id))
    }

    fn active_checkpoint(&self, run_id: Uuid) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM checkpoints WHERE run_id = ?1 AND resolved = 0",
                params![run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|json| serde_json::from_str(&json).map_err(InvoiceflowError::from))
            .transpose()
    }

    fn mark_checkpoint_resolved(&self, checkpoint_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let checkpoint = read_checkpoint(&conn, checkpoint_id)?
            .ok_or_else(|| InvoiceflowError::not_found("checkpoint", checkpoint_id))?;
        if checkpoint.resolved {
            return Ok(());
        }
        set_checkpoint_resolved(&conn, &checkpoint)
    }

    fn get_review(&self, review_id: &str) -> Result<ReviewItem> {
        read_review(&self.conn.lock(), "review_id", review_id)?
            .ok_or_else(|| InvoiceflowError::not_found("review", review_id))
    }

    fn review_for_checkpoint(&self, checkpoint_id: &str) -> Result<ReviewItem> {
        read_review(&self.conn.lock(), "checkpoint_id", checkpoint_id)?
            .ok_or_else(|| InvoiceflowError::not_found("review", checkpoint_id))
    }

    fn list_pending_reviews(&self) -> Result<Vec<ReviewItem>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT record FROM review_items WHERE status = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![ReviewState::Pending.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut items = Vec::new();
        for row in rows {
            items.push(serde_json::from_str(&row?)?);
        }
        Ok(items)
    }

    fn resolve_review(&self, review_id: &str, resolution: &Resolution) -> Result<ReviewItem> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let review = match read_review(&tx, "review_id", review_id)? {
            Some(review) if review.is_pending() => review,
            _ => {
                return Err(InvoiceflowError::AlreadyResolved {
                    id: review_id.to_string(),
                })
            }
        };
        let checkpoint = read_checkpoint(&tx, &review.checkpoint_id)?
            .ok_or_else(|| InvoiceflowError::not_found("checkpoint", &review.checkpoint_id))?;
        let run = read_run(&tx, review.run_id)?
            .ok_or_else(|| InvoiceflowError::not_found("run", review.run_id.to_string()))?;
        ensure_resolvable(&run, &checkpoint)?;

        let mut resolved = review;
        resolved.state = ReviewState::Resolved;
        resolved.resolution = Some(resolution.clone());
        let updated = tx.execute(
            "UPDATE review_items SET status = ?2, record = ?3 WHERE review_id = ?1 AND status = ?4",
            params![
                resolved.review_id,
                ReviewState::Resolved.as_str(),
                serde_json::to_string(&resolved)?,
                ReviewState::Pending.as_str(),
            ],
        )?;
        if updated != 1 {
            return Err(InvoiceflowError::AlreadyResolved {
                id: review_id.to_string(),
            });
        }
        set_checkpoint_resolved(&tx, &checkpoint)?;
        tx.commit()?;
        Ok(resolved)
    }
}
