//! SQLite connection handle.
//!
//! [`Database`] wraps a single `rusqlite::Connection` behind an
//! `Arc<Mutex<>>`. Async callers hand it closures which run on the tokio
//! blocking pool, so a slow query never stalls the executor threads that
//! are busy racing handler timeouts.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Cheaply cloneable, thread-safe handle to the toolforge database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file at `path`.
    ///
    /// Blocks on file I/O; call during startup or from `spawn_blocking`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database. Used heavily by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database at `path` and bring its schema up to date.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open an in-memory database with the full schema applied.
    pub async fn in_memory_migrated() -> StoreResult<Self> {
        let db = Self::open_in_memory()?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply every pending schema migration.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(migration::run_all).await
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// ```ignore
    /// let n: i64 = db.execute(|conn| {
    ///     Ok(conn.query_row("SELECT count(*) FROM primitives", [], |r| r.get(0))?)
    /// }).await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // WAL lets the execution log be appended while the registry reads.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        // Plugin deletion relies on ON DELETE CASCADE.
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        debug!("database pragmas applied");
        Ok(())
    }
}
