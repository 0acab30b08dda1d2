//! Versioned schema migrations.
//!
//! Each migration is a static SQL batch with a version number. Applied
//! versions are recorded in `_migrations`, so running the set twice is a
//! no-op.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "plugins and primitives",
        sql: r#"
            CREATE TABLE plugins (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL UNIQUE,
                slug          TEXT NOT NULL UNIQUE,
                description   TEXT,
                icon          TEXT,
                color         TEXT,
                version       TEXT NOT NULL DEFAULT '1.0.0',
                author        TEXT,
                config        TEXT,
                config_schema TEXT,
                enabled       BOOLEAN NOT NULL DEFAULT 0,
                installed     BOOLEAN NOT NULL DEFAULT 1,
                built_in      BOOLEAN NOT NULL DEFAULT 0,
                created_at    INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL
            );

            CREATE TABLE primitives (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL UNIQUE,
                description   TEXT NOT NULL DEFAULT '',
                input_schema  TEXT NOT NULL,
                handler       TEXT NOT NULL,
                dependencies  TEXT NOT NULL DEFAULT '[]',
                author        TEXT,
                tags          TEXT NOT NULL DEFAULT '[]',
                tier          TEXT NOT NULL DEFAULT 'free' CHECK(tier IN ('free','restricted')),
                category      TEXT,
                icon          TEXT,
                timeout_ms    INTEGER NOT NULL DEFAULT 30000,
                memory_mb     INTEGER,
                sandbox       BOOLEAN NOT NULL DEFAULT 1,
                enabled       BOOLEAN NOT NULL DEFAULT 1,
                built_in      BOOLEAN NOT NULL DEFAULT 0,
                plugin_id     TEXT REFERENCES plugins(id) ON DELETE CASCADE,
                version       TEXT NOT NULL DEFAULT '1.0.0',
                created_at    INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL
            );
            CREATE INDEX idx_primitives_plugin ON primitives(plugin_id);
            CREATE INDEX idx_primitives_category ON primitives(category);
            CREATE INDEX idx_primitives_enabled ON primitives(enabled);
        "#,
    },
    Migration {
        version: 2,
        description: "workflow records",
        sql: r#"
            CREATE TABLE workflows (
                id             TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                description    TEXT,
                nodes          TEXT NOT NULL DEFAULT '[]',
                edges          TEXT NOT NULL DEFAULT '[]',
                trigger_type   TEXT NOT NULL DEFAULT 'manual'
                               CHECK(trigger_type IN ('manual','schedule','webhook','event','agent')),
                trigger_config TEXT,
                enabled        BOOLEAN NOT NULL DEFAULT 1,
                created_at     INTEGER NOT NULL,
                updated_at     INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        description: "primitive execution log",
        sql: r#"
            CREATE TABLE primitive_executions (
                id                TEXT PRIMARY KEY,
                primitive_id      TEXT NOT NULL,
                invocation_id     TEXT NOT NULL,
                status            TEXT NOT NULL CHECK(status IN ('success','failed')),
                error             TEXT,
                execution_time_ms INTEGER NOT NULL,
                created_at        INTEGER NOT NULL
            );
            CREATE INDEX idx_executions_primitive ON primitive_executions(primitive_id);
        "#,
    },
];

/// Run all pending migrations against `conn`.
///
/// Synchronous; call through [`crate::Database::execute`].
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration inside an immediate transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    // `conn.transaction()` needs `&mut Connection`; manage it by hand.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| fail(format!("SQL execution failed: {e}")))?;
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().timestamp_millis()
            ],
        )
        .map_err(|e| fail(format!("failed to record migration: {e}")))?;
        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| fail(format!("failed to commit: {e}")))?;
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}
