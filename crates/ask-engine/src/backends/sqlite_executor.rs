//! Read-only SQLite query execution

use std::path::{Path, PathBuf};
use std::time::Instant;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Number, Value};
use tracing::debug;

use crate::engine::{ExecutionOutcome, QueryExecutor};
use crate::memory_db::Row;

/// Executes generated queries against a data database opened read-only
pub struct SqliteQueryExecutor {
    path: PathBuf,
}

impl SqliteQueryExecutor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> anyhow::Result<Connection> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| anyhow::anyhow!("Failed to open data database {}: {}", path.display(), e))
    }

    /// Whether the data database can be opened at all
    pub fn check(&self) -> anyhow::Result<()> {
        let conn = Self::open(&self.path)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn run(path: &Path, query: &str) -> anyhow::Result<Vec<Row>> {
        let conn = Self::open(path)?;
        let mut stmt = conn.prepare(query)?;
        if !stmt.readonly() {
            return Err(anyhow::anyhow!("Refusing to run a statement that writes"));
        }
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Row::new();
            for (i, name) in columns.iter().enumerate() {
                object.insert(name.clone(), to_json(row.get_ref(i)?));
            }
            out.push(object);
        }
        Ok(out)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} byte blob>", bytes.len())),
    }
}

#[async_trait]
impl QueryExecutor for SqliteQueryExecutor {
    async fn execute(&self, query: &str) -> anyhow::Result<ExecutionOutcome> {
        let path = self.path.clone();
        let query = query.to_string();
        let started = Instant::now();
        let rows = tokio::task::spawn_blocking(move || Self::run(&path, &query))
            .await
            .map_err(|e| anyhow::anyhow!("Query task failed: {}", e))??;
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!("Query returned {} rows in {}ms", rows.len(), duration_ms);
        Ok(ExecutionOutcome { rows, duration_ms })
    }
}
