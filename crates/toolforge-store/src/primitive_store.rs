//! Primitive persistence.
//!
//! CRUD on the `primitives` table. JSON-valued columns (input schema,
//! dependency and tag lists) are stored as text and decoded in a second
//! step so the `rusqlite` row closure stays infallible with respect to
//! JSON.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Default handler timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Version assigned to freshly created primitives.
pub const INITIAL_VERSION: &str = "1.0.0";

const COLUMNS: &str = "id, name, description, input_schema, handler, dependencies, author, tags, \
                       tier, category, icon, timeout_ms, memory_mb, sandbox, enabled, built_in, \
                       plugin_id, version, created_at, updated_at";

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Access classification of a primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Usable by anyone.
    #[default]
    Free,
    /// Gated behind an entitlement checked by the host.
    Restricted,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "restricted" => Ok(Self::Restricted),
            other => Err(StoreError::InvalidColumn {
                column: "tier",
                value: other.to_owned(),
            }),
        }
    }
}

/// A persisted primitive definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPrimitive {
    /// Generated identifier (`prim_<uuid>`).
    pub id: String,
    /// Unique, human-chosen name such as `text.uppercase`.
    pub name: String,
    pub description: String,
    /// JSON-Schema-like description of accepted arguments.
    pub input_schema: serde_json::Value,
    /// Handler source code.
    pub handler: String,
    /// Advisory list of libraries the handler assumes.
    pub dependencies: Vec<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub tier: Tier,
    pub category: Option<String>,
    pub icon: Option<String>,
    /// Wall-clock budget per invocation, in milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    /// Advisory memory hint, in MiB. Never enforced.
    #[serde(rename = "memory")]
    pub memory_mb: Option<u32>,
    /// Whether the handler runs in the isolated sandbox context.
    pub sandbox: bool,
    pub enabled: bool,
    pub built_in: bool,
    pub plugin_id: Option<String>,
    /// Semantic version, patch bumped on every update.
    pub version: String,
    /// Unix timestamp (ms) of creation.
    pub created_at: i64,
    /// Unix timestamp (ms) of the last update.
    pub updated_at: i64,
}

/// Fields supplied when inserting a primitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrimitive {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub handler: String,
    pub dependencies: Vec<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub tier: Tier,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub timeout_ms: u64,
    pub memory_mb: Option<u32>,
    pub sandbox: bool,
    pub enabled: bool,
    pub built_in: bool,
    pub plugin_id: Option<String>,
}

/// Filters for [`PrimitiveStore::list`]. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveQuery {
    pub category: Option<String>,
    /// Matches primitives carrying any of these tags.
    pub tags: Vec<String>,
    pub plugin_id: Option<String>,
    /// Substring matched against name and description. Case folding is
    /// SQLite `lower()`, which covers ASCII letters only.
    pub search: Option<String>,
    pub enabled: Option<bool>,
}

// ═══════════════════════════════════════════════════════════════════════
//  PrimitiveStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD operations on primitive definitions.
#[derive(Clone)]
pub struct PrimitiveStore {
    db: Database,
}

impl PrimitiveStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a primitive and return the stored record.
    ///
    /// A duplicate name surfaces as a SQLite `UNIQUE` violation; see
    /// [`StoreError::is_unique_violation`].
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create(&self, new: NewPrimitive) -> StoreResult<StoredPrimitive> {
        let timeout_ms = timeout_column(new.timeout_ms)?;
        let now = Utc::now().timestamp_millis();
        let record = StoredPrimitive {
            id: format!("prim_{}", Uuid::now_v7().simple()),
            name: new.name,
            description: new.description,
            input_schema: new.input_schema,
            handler: new.handler,
            dependencies: new.dependencies,
            author: new.author,
            tags: new.tags,
            tier: new.tier,
            category: new.category,
            icon: new.icon,
            timeout_ms: new.timeout_ms,
            memory_mb: new.memory_mb,
            sandbox: new.sandbox,
            enabled: new.enabled,
            built_in: new.built_in,
            plugin_id: new.plugin_id,
            version: INITIAL_VERSION.to_owned(),
            created_at: now,
            updated_at: now,
        };

        let row = record.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO primitives ({COLUMNS}) VALUES \
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
                    ),
                    rusqlite::params![
                        row.id,
                        row.name,
                        row.description,
                        serde_json::to_string(&row.input_schema)?,
                        row.handler,
                        serde_json::to_string(&row.dependencies)?,
                        row.author,
                        serde_json::to_string(&row.tags)?,
                        row.tier.as_str(),
                        row.category,
                        row.icon,
                        timeout_ms,
                        row.memory_mb,
                        row.sandbox,
                        row.enabled,
                        row.built_in,
                        row.plugin_id,
                        row.version,
                        row.created_at,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(primitive_id = %record.id, "primitive created");
        Ok(record)
    }

    /// Fetch a primitive by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredPrimitive>> {
        self.fetch_one("id", id).await
    }

    /// Fetch a primitive by its unique name.
    #[instrument(skip(self))]
    pub async fn get_by_name(&self, name: &str) -> StoreResult<Option<StoredPrimitive>> {
        self.fetch_one("name", name).await
    }

    /// List primitives matching `query`, ordered by name.
    #[instrument(skip(self))]
    pub async fn list(&self, query: &PrimitiveQuery) -> StoreResult<Vec<StoredPrimitive>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(category) = &query.category {
            params.push(SqlValue::Text(category.clone()));
            clauses.push(format!("category = ?{}", params.len()));
        }
        if let Some(plugin_id) = &query.plugin_id {
            params.push(SqlValue::Text(plugin_id.clone()));
            clauses.push(format!("plugin_id = ?{}", params.len()));
        }
        if let Some(enabled) = query.enabled {
            params.push(SqlValue::Integer(i64::from(enabled)));
            clauses.push(format!("enabled = ?{}", params.len()));
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            params.push(SqlValue::Text(like_pattern(search)));
            let n = params.len();
            clauses.push(format!(
                "(lower(name) LIKE ?{n} ESCAPE '\\' OR lower(description) LIKE ?{n} ESCAPE '\\')"
            ));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM primitives");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY name");

        let rows = self
            .db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), PrimitiveRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(PrimitiveRow::into_stored).collect::<StoreResult<Vec<_>>>()
            })
            .await?;

        if query.tags.is_empty() {
            return Ok(rows);
        }
        Ok(rows
            .into_iter()
            .filter(|p| p.tags.iter().any(|t| query.tags.contains(t)))
            .collect())
    }

    /// All primitives whose persisted intent is `enabled = true`.
    pub async fn list_enabled(&self) -> StoreResult<Vec<StoredPrimitive>> {
        self.list(&PrimitiveQuery {
            enabled: Some(true),
            ..PrimitiveQuery::default()
        })
        .await
    }

    /// All primitives owned by `plugin_id`.
    pub async fn list_by_plugin(&self, plugin_id: &str) -> StoreResult<Vec<StoredPrimitive>> {
        self.list(&PrimitiveQuery {
            plugin_id: Some(plugin_id.to_owned()),
            ..PrimitiveQuery::default()
        })
        .await
    }

    /// Overwrite every mutable column of `primitive` and stamp
    /// `updated_at`. Returns the record as persisted.
    #[instrument(skip(self, primitive), fields(primitive_id = %primitive.id))]
    pub async fn update(&self, primitive: &StoredPrimitive) -> StoreResult<StoredPrimitive> {
        let timeout_ms = timeout_column(primitive.timeout_ms)?;
        let mut record = primitive.clone();
        record.updated_at = Utc::now().timestamp_millis();

        let row = record.clone();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE primitives SET name = ?2, description = ?3, input_schema = ?4, handler = ?5, \
                     dependencies = ?6, author = ?7, tags = ?8, tier = ?9, category = ?10, icon = ?11, \
                     timeout_ms = ?12, memory_mb = ?13, sandbox = ?14, enabled = ?15, plugin_id = ?16, \
                     version = ?17, updated_at = ?18 WHERE id = ?1",
                    rusqlite::params![
                        row.id,
                        row.name,
                        row.description,
                        serde_json::to_string(&row.input_schema)?,
                        row.handler,
                        serde_json::to_string(&row.dependencies)?,
                        row.author,
                        serde_json::to_string(&row.tags)?,
                        row.tier.as_str(),
                        row.category,
                        row.icon,
                        timeout_ms,
                        row.memory_mb,
                        row.sandbox,
                        row.enabled,
                        row.plugin_id,
                        row.version,
                        row.updated_at,
                    ],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "primitive",
                        id: row.id,
                    });
                }
                Ok(())
            })
            .await?;

        Ok(record)
    }

    /// Delete a primitive by id.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute("DELETE FROM primitives WHERE id = ?1", [&id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "primitive",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Total number of stored primitives.
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM primitives", [], |row| row.get(0))?))
            .await
    }

    async fn fetch_one(&self, column: &'static str, key: &str) -> StoreResult<Option<StoredPrimitive>> {
        let key = key.to_owned();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {COLUMNS} FROM primitives WHERE {column} = ?1"),
                    [&key],
                    PrimitiveRow::from_row,
                );
                match result {
                    Ok(row) => row.into_stored().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }
}

/// SQLite integers are signed; refuse timeouts that would wrap.
fn timeout_column(timeout_ms: u64) -> StoreResult<i64> {
    i64::try_from(timeout_ms).map_err(|_| StoreError::OutOfRange {
        field: "timeout_ms",
        value: timeout_ms.to_string(),
    })
}

/// Turn a free-text search term into a lowercase `LIKE` pattern with
/// `%`, `_` and `\` escaped.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

struct PrimitiveRow {
    id: String,
    name: String,
    description: String,
    input_schema: String,
    handler: String,
    dependencies: String,
    author: Option<String>,
    tags: String,
    tier: String,
    category: Option<String>,
    icon: Option<String>,
    timeout_ms: i64,
    memory_mb: Option<u32>,
    sandbox: bool,
    enabled: bool,
    built_in: bool,
    plugin_id: Option<String>,
    version: String,
    created_at: i64,
    updated_at: i64,
}

impl PrimitiveRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            input_schema: row.get(3)?,
            handler: row.get(4)?,
            dependencies: row.get(5)?,
            author: row.get(6)?,
            tags: row.get(7)?,
            tier: row.get(8)?,
            category: row.get(9)?,
            icon: row.get(10)?,
            timeout_ms: row.get(11)?,
            memory_mb: row.get(12)?,
            sandbox: row.get(13)?,
            enabled: row.get(14)?,
            built_in: row.get(15)?,
            plugin_id: row.get(16)?,
            version: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }

    fn into_stored(self) -> StoreResult<StoredPrimitive> {
        Ok(StoredPrimitive {
            id: self.id,
            name: self.name,
            description: self.description,
            input_schema: serde_json::from_str(&self.input_schema)?,
            handler: self.handler,
            dependencies: serde_json::from_str(&self.dependencies)?,
            author: self.author,
            tags: serde_json::from_str(&self.tags)?,
            tier: self.tier.parse()?,
            category: self.category,
            icon: self.icon,
            timeout_ms: u64::try_from(self.timeout_ms).map_err(|_| StoreError::InvalidColumn {
                column: "timeout_ms",
                value: self.timeout_ms.to_string(),
            })?,
            memory_mb: self.memory_mb,
            sandbox: self.sandbox,
            enabled: self.enabled,
            built_in: self.built_in,
            plugin_id: self.plugin_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
