//! Trace persistence: the store contract and its SQLite backend.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::DateTime;
use rusqlite::{params, Connection};
use serde_json::Value;
use thiserror::Error;
use xray_core::{Data, Trace, TraceSummary};

/// Errors from trace store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Lock error")]
    Lock,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid trace id: {0:?}")]
    InvalidId(String),
    #[error("Trace not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Durable keyed storage for finalized traces, one record per trace id.
///
/// Implementations must publish each save atomically: a concurrent reader
/// sees either the previous record or the new one, never a partial write.
pub trait TraceStore: Send + Sync {
    /// Inserts or replaces the record for `trace.id`.
    fn save(&self, trace: &Trace) -> Result<(), StoreError>;

    /// Returns the record for `id`, or `None` if there is none.
    fn get(&self, id: &str) -> Result<Option<Trace>, StoreError>;

    /// Summaries of every stored trace, newest `startTime` first, ties by id.
    ///
    /// Unreadable records are skipped with a warning.
    fn list(&self) -> Result<Vec<TraceSummary>, StoreError>;

    /// Removes the record for `id`. Returns whether one existed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Removes every record, returning how many were removed.
    fn clear(&self) -> Result<usize, StoreError>;

    /// Shallow-merges `patch` (top-level trace fields) over the stored record
    /// and saves the result.
    fn update(&self, id: &str, patch: Data) -> Result<Trace, StoreError> {
        let current = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let updated = apply_patch(&current, patch)?;
        self.save(&updated)?;
        tracing::debug!(trace_id = %id, "Updated trace");
        Ok(updated)
    }
}

pub(crate) fn apply_patch(trace: &Trace, patch: Data) -> Result<Trace, StoreError> {
    if let Some(new_id) = patch.get("id") {
        if new_id.as_str() != Some(trace.id.as_str()) {
            return Err(StoreError::InvalidState(format!(
                "update cannot change the id of trace {}",
                trace.id
            )));
        }
    }

    let mut record = match serde_json::to_value(trace)? {
        Value::Object(map) => map,
        _ => {
            return Err(StoreError::InvalidState(format!(
                "trace {} did not serialize to an object",
                trace.id
            )))
        }
    };
    for (key, value) in patch {
        record.insert(key, value);
    }

    Ok(serde_json::from_value(Value::Object(record))?)
}

pub(crate) fn sort_summaries(summaries: &mut [TraceSummary]) {
    summaries.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// SQLite-backed trace storage.
///
/// Summary columns are kept alongside the full JSON body so `list()` never
/// has to decode step bodies.
pub struct SqliteTraceStore {
    conn: Mutex<Connection>,
}

impl SqliteTraceStore {
    /// Opens (or creates) a trace database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates an in-memory trace store (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS traces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                start_secs INTEGER NOT NULL,
                start_nanos INTEGER NOT NULL,
                duration INTEGER,
                steps_count INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_traces_start ON traces(start_secs DESC, start_nanos DESC, id);
            "#,
        )?;

        Ok(())
    }
}

impl TraceStore for SqliteTraceStore {
    fn save(&self, trace: &Trace) -> Result<(), StoreError> {
        let body = serde_json::to_string(trace)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute(
            r#"INSERT OR REPLACE INTO traces
               (id, name, status, start_secs, start_nanos, duration, steps_count, body)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                trace.id,
                trace.name,
                trace.status.as_str(),
                trace.start_time.timestamp(),
                trace.start_time.timestamp_subsec_nanos(),
                trace.duration,
                trace.steps.len(),
                body,
            ],
        )?;

        tracing::debug!(trace_id = %trace.id, "Saved trace");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Trace>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let result = conn.query_row(
            "SELECT body FROM traces WHERE id = ?1",
            params![id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(body) => Ok(Some(serde_json::from_str(&body)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<TraceSummary>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let mut stmt = conn.prepare(
            r#"SELECT id, name, status, start_secs, start_nanos, duration, steps_count
               FROM traces ORDER BY start_secs DESC, start_nanos DESC, id ASC"#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, Option<u64>>(5)?,
                row.get::<_, usize>(6)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, name, status, start_secs, start_nanos, duration, steps_count) = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!("Skipping unreadable trace row: {}", e);
                    continue;
                }
            };

            let status = match status.parse() {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(trace_id = %id, "Skipping trace: {}", e);
                    continue;
                }
            };
            let Some(start_time) = DateTime::from_timestamp(start_secs, start_nanos) else {
                tracing::warn!(trace_id = %id, start_secs, start_nanos, "Skipping trace with invalid start time");
                continue;
            };

            summaries.push(TraceSummary {
                id,
                name,
                status,
                start_time,
                duration,
                steps_count,
            });
        }

        Ok(summaries)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let removed = conn.execute("DELETE FROM traces WHERE id = ?1", params![id])?;
        tracing::debug!(trace_id = %id, removed = removed > 0, "Deleted trace");
        Ok(removed > 0)
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        Ok(conn.execute("DELETE FROM traces", [])?)
    }
}
