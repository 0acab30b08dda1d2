//! Plugin persistence.
//!
//! Plugins group primitives. Deleting a plugin row cascades to its
//! primitives through the `plugin_id` foreign key.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

const COLUMNS: &str = "id, name, slug, description, icon, color, version, author, config, \
                       config_schema, enabled, installed, built_in, created_at, updated_at";

/// A persisted plugin record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPlugin {
    pub id: String,
    pub name: String,
    /// URL-safe unique identifier.
    pub slug: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub version: String,
    pub author: Option<String>,
    /// Opaque settings object.
    pub config: Option<serde_json::Value>,
    /// Advisory schema for `config`; never enforced here.
    pub config_schema: Option<serde_json::Value>,
    pub enabled: bool,
    pub installed: bool,
    pub built_in: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields supplied when inserting a plugin. Plugins are always stored
/// disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlugin {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub config: Option<serde_json::Value>,
    pub config_schema: Option<serde_json::Value>,
    pub built_in: bool,
}

/// CRUD operations on plugins.
#[derive(Clone)]
pub struct PluginStore {
    db: Database,
}

impl PluginStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a disabled, installed plugin.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create(&self, new: NewPlugin) -> StoreResult<StoredPlugin> {
        let now = Utc::now().timestamp_millis();
        let plugin = StoredPlugin {
            id: format!("plug_{}", Uuid::now_v7().simple()),
            name: new.name,
            slug: new.slug,
            description: new.description,
            icon: new.icon,
            color: new.color,
            version: new.version.unwrap_or_else(|| "1.0.0".to_owned()),
            author: new.author,
            config: new.config,
            config_schema: new.config_schema,
            enabled: false,
            installed: true,
            built_in: new.built_in,
            created_at: now,
            updated_at: now,
        };

        let row = plugin.clone();
        self.db
            .execute(move |conn| {
                let config = row.config.as_ref().map(serde_json::to_string).transpose()?;
                let config_schema = row
                    .config_schema
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                conn.execute(
                    &format!(
                        "INSERT INTO plugins ({COLUMNS}) VALUES \
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                    ),
                    rusqlite::params![
                        row.id,
                        row.name,
                        row.slug,
                        row.description,
                        row.icon,
                        row.color,
                        row.version,
                        row.author,
                        config,
                        config_schema,
                        row.enabled,
                        row.installed,
                        row.built_in,
                        row.created_at,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(plugin_id = %plugin.id, slug = %plugin.slug, "plugin created");
        Ok(plugin)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredPlugin>> {
        self.fetch_one("id", id).await
    }

    #[instrument(skip(self))]
    pub async fn get_by_name(&self, name: &str) -> StoreResult<Option<StoredPlugin>> {
        self.fetch_one("name", name).await
    }

    #[instrument(skip(self))]
    pub async fn get_by_slug(&self, slug: &str) -> StoreResult<Option<StoredPlugin>> {
        self.fetch_one("slug", slug).await
    }

    /// All plugins ordered by name.
    #[instrument(skip(self))]
    pub async fn list(&self) -> StoreResult<Vec<StoredPlugin>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM plugins ORDER BY name"))?;
                let rows = stmt
                    .query_map([], PluginRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(PluginRow::into_stored).collect()
            })
            .await
    }

    /// Persist the enabled flag.
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> StoreResult<()> {
        let id = id.to_owned();
        let now = Utc::now().timestamp_millis();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE plugins SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, enabled, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "plugin",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Delete a plugin. Owned primitives go with it.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute("DELETE FROM plugins WHERE id = ?1", [&id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "plugin",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM plugins", [], |row| row.get(0))?))
            .await
    }

    pub async fn count_enabled(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM plugins WHERE enabled = 1", [], |row| {
                    row.get(0)
                })?)
            })
            .await
    }

    async fn fetch_one(&self, column: &'static str, key: &str) -> StoreResult<Option<StoredPlugin>> {
        let key = key.to_owned();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {COLUMNS} FROM plugins WHERE {column} = ?1"),
                    [&key],
                    PluginRow::from_row,
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

struct PluginRow {
    id: String,
    name: String,
    slug: String,
    description: Option<String>,
    icon: Option<String>,
    color: Option<String>,
    version: String,
    author: Option<String>,
    config: Option<String>,
    config_schema: Option<String>,
    enabled: bool,
    installed: bool,
    built_in: bool,
    created_at: i64,
    updated_at: i64,
}

impl PluginRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            icon: row.get(4)?,
            color: row.get(5)?,
            version: row.get(6)?,
            author: row.get(7)?,
            config: row.get(8)?,
            config_schema: row.get(9)?,
            enabled: row.get(10)?,
            installed: row.get(11)?,
            built_in: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_stored(self) -> StoreResult<StoredPlugin> {
        Ok(StoredPlugin {
            id: self.id,
            name: self.name,
            slug: self.slug,
            description: self.description,
            icon: self.icon,
            color: self.color,
            version: self.version,
            author: self.author,
            config: self.config.map(|c| serde_json::from_str(&c)).transpose()?,
            config_schema: self
                .config_schema
                .map(|c| serde_json::from_str(&c))
                .transpose()?,
            enabled: self.enabled,
            installed: self.installed,
            built_in: self.built_in,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup() -> PluginStore {
        PluginStore::new(Database::in_memory_migrated().await.unwrap())
    }

    fn new_plugin(name: &str, slug: &str) -> NewPlugin {
        NewPlugin {
            name: name.to_owned(),
            slug: slug.to_owned(),
            ..NewPlugin::default()
        }
    }

    #[tokio::test]
    async fn create_is_disabled_and_installed() {
        let store = setup().await;
        let mut new = new_plugin("Text Tools", "text-tools");
        new.config = Some(json!({"locale": "en"}));
        let plugin = store.create(new).await.unwrap();

        assert!(plugin.id.starts_with("plug_"));
        assert!(!plugin.enabled);
        assert!(plugin.installed);
        assert_eq!(plugin.version, "1.0.0");

        let fetched = store.get_by_slug("text-tools").await.unwrap().unwrap();
        assert_eq!(fetched, plugin);
    }

    #[tokio::test]
    async fn slug_and_name_are_unique() {
        let store = setup().await;
        store.create(new_plugin("A", "a")).await.unwrap();
        assert!(store
            .create(new_plugin("A", "other"))
            .await
            .unwrap_err()
            .is_unique_violation());
        assert!(store
            .create(new_plugin("Other", "a"))
            .await
            .unwrap_err()
            .is_unique_violation());
    }

    #[tokio::test]
    async fn enable_and_count() {
        let store = setup().await;
        let a = store.create(new_plugin("A", "a")).await.unwrap();
        store.create(new_plugin("B", "b")).await.unwrap();

        store.set_enabled(&a.id, true).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.count_enabled().await.unwrap(), 1);
        assert!(store.get(&a.id).await.unwrap().unwrap().enabled);

        assert!(matches!(
            store.set_enabled("plug_missing", true).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = setup().await;
        let a = store.create(new_plugin("A", "a")).await.unwrap();
        store.delete(&a.id).await.unwrap();
        assert!(store.get(&a.id).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }
}
