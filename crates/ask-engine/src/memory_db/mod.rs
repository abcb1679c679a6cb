
//! Query record database - SQLite-based storage for resolved questions
pub mod schema;
pub mod migration;
pub mod record_store;
pub use schema::*;
pub use migration::MigrationManager;
pub use record_store::{InMemoryRecordStore, RecordStore, SqliteRecordStore};
use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

/// Handle over the query record database and its connection pool
pub struct QueryDatabase {
    pub records: Arc<SqliteRecordStore>,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl QueryDatabase {
    /// Open (or create) the database file and bring the schema up to date
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening query record database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| conn.execute_batch("PRAGMA busy_timeout = 5000;"));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            let mut migrator = migration::MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        let pool = Arc::new(pool);
        info!("Query record database initialized successfully");
        Ok(Self {
            records: Arc::new(SqliteRecordStore::new(Arc::clone(&pool))),
            pool,
        })
    }

    /// Every in-memory SQLite connection is its own database, so the pool holds one
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            let mut migrator = migration::MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        let pool = Arc::new(pool);
        Ok(Self {
            records: Arc::new(SqliteRecordStore::new(Arc::clone(&pool))),
            pool,
        })
    }

    pub fn pool(&self) -> Arc<Pool<SqliteConnectionManager>> {
        Arc::clone(&self.pool)
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}
