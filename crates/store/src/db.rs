use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use loomtrace_core::error::{Result, TraceError};
use tracing::debug;

use crate::schema::SCHEMA_SQL;

/// Persisted storage in a DuckDB file.
#[derive(Clone)]
pub struct DbStorage {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl DbStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| TraceError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TraceError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TraceError::Store(format!("failed to initialize schema: {e}")))?;
        debug!(path = %path.display(), "opened eval store");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TraceError::Store(format!("failed to open in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TraceError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Runs `f` against the open connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| TraceError::Internal("store mutex poisoned".to_string()))?;
        let conn = guard.as_mut().ok_or(TraceError::Closed("eval store"))?;
        f(conn)
    }

    pub(crate) fn close_conn(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| TraceError::Internal("store mutex poisoned".to_string()))?;
        let Some(conn) = guard.take() else {
            return Ok(());
        };
        conn.close()
            .map_err(|(_, e)| TraceError::Store(format!("failed to close duckdb: {e}")))
    }
}

pub(crate) fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| TraceError::Store(format!("query failed: {e}")))
}

pub(crate) fn naive_to_utc(ts: NaiveDateTime) -> DateTime<Utc> {
    ts.and_utc()
}
