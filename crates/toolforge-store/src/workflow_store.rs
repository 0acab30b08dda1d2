//! Workflow record persistence.
//!
//! Workflows are graphs of nodes and edges that reference primitives.
//! Only the records are managed here; nodes and edges are kept as opaque
//! JSON and never interpreted.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

const COLUMNS: &str =
    "id, name, description, nodes, edges, trigger_type, trigger_config, enabled, created_at, updated_at";

/// What starts a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Manual,
    Schedule,
    Webhook,
    Event,
    Agent,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::Event => "event",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "schedule" => Ok(Self::Schedule),
            "webhook" => Ok(Self::Webhook),
            "event" => Ok(Self::Event),
            "agent" => Ok(Self::Agent),
            other => Err(StoreError::InvalidColumn {
                column: "trigger_type",
                value: other.to_owned(),
            }),
        }
    }
}

/// A persisted workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWorkflow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// JSON array of node definitions.
    pub nodes: serde_json::Value,
    /// JSON array of edge definitions.
    pub edges: serde_json::Value,
    pub trigger_type: TriggerType,
    pub trigger_config: Option<serde_json::Value>,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields supplied when inserting a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub nodes: serde_json::Value,
    pub edges: serde_json::Value,
    pub trigger_type: TriggerType,
    pub trigger_config: Option<serde_json::Value>,
}

/// CRUD operations on workflow records.
#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an enabled workflow and return the stored record.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create(&self, new: NewWorkflow) -> StoreResult<StoredWorkflow> {
        let now = Utc::now().timestamp_millis();
        let nodes = if new.nodes.is_null() {
            serde_json::Value::Array(Vec::new())
        } else {
            new.nodes
        };
        let edges = if new.edges.is_null() {
            serde_json::Value::Array(Vec::new())
        } else {
            new.edges
        };
        let workflow = StoredWorkflow {
            id: format!("wf_{}", Uuid::now_v7().simple()),
            name: new.name,
            description: new.description,
            nodes,
            edges,
            trigger_type: new.trigger_type,
            trigger_config: new.trigger_config,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        let row = workflow.clone();
        self.db
            .execute(move |conn| {
                let trigger_config = row
                    .trigger_config
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                conn.execute(
                    &format!("INSERT INTO workflows ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                    rusqlite::params![
                        row.id,
                        row.name,
                        row.description,
                        serde_json::to_string(&row.nodes)?,
                        serde_json::to_string(&row.edges)?,
                        row.trigger_type.as_str(),
                        trigger_config,
                        row.enabled,
                        row.created_at,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(workflow_id = %workflow.id, "workflow created");
        Ok(workflow)
    }

    /// Fetch a single workflow by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredWorkflow>> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {COLUMNS} FROM workflows WHERE id = ?1"),
                    [&id],
                    WorkflowRow::from_row,
                );
                match result {
                    Ok(row) => row.into_stored().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List workflows, most recently updated first.
    #[instrument(skip(self))]
    pub async fn list(&self, enabled_only: bool) -> StoreResult<Vec<StoredWorkflow>> {
        self.db
            .execute(move |conn| {
                let filter = if enabled_only { "WHERE enabled = 1 " } else { "" };
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM workflows {filter}ORDER BY updated_at DESC"
                ))?;
                let rows = stmt
                    .query_map([], WorkflowRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(WorkflowRow::into_stored).collect()
            })
            .await
    }

    /// Toggle a workflow's enabled flag.
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> StoreResult<()> {
        let id = id.to_owned();
        let now = Utc::now().timestamp_millis();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflows SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, enabled, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Delete a workflow by id.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute("DELETE FROM workflows WHERE id = ?1", [&id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM workflows", [], |row| row.get(0))?))
            .await
    }
}

/// Raw row before JSON decoding.
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    nodes: String,
    edges: String,
    trigger_type: String,
    trigger_config: Option<String>,
    enabled: bool,
    created_at: i64,
    updated_at: i64,
}

impl WorkflowRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            nodes: row.get(3)?,
            edges: row.get(4)?,
            trigger_type: row.get(5)?,
            trigger_config: row.get(6)?,
            enabled: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_stored(self) -> StoreResult<StoredWorkflow> {
        Ok(StoredWorkflow {
            id: self.id,
            name: self.name,
            description: self.description,
            nodes: serde_json::from_str(&self.nodes)?,
            edges: serde_json::from_str(&self.edges)?,
            trigger_type: self.trigger_type.parse()?,
            trigger_config: self
                .trigger_config
                .map(|t| serde_json::from_str(&t))
                .transpose()?,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup() -> WorkflowStore {
        WorkflowStore::new(Database::in_memory_migrated().await.unwrap())
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let store = setup().await;
        let nodes = json!([{"id": "n1", "primitive": "text.uppercase"}]);
        let workflow = store
            .create(NewWorkflow {
                name: "shout".into(),
                description: Some("uppercases input".into()),
                nodes: nodes.clone(),
                edges: json!([]),
                trigger_type: TriggerType::Webhook,
                trigger_config: Some(json!({"path": "/shout"})),
            })
            .await
            .unwrap();

        assert!(workflow.id.starts_with("wf_"));
        assert!(workflow.enabled);

        let fetched = store.get(&workflow.id).await.unwrap().unwrap();
        assert_eq!(fetched, workflow);
        assert_eq!(fetched.nodes, nodes);
        assert_eq!(fetched.trigger_type, TriggerType::Webhook);
    }

    #[tokio::test]
    async fn null_graph_defaults_to_empty_arrays() {
        let store = setup().await;
        let workflow = store
            .create(NewWorkflow {
                name: "empty".into(),
                ..NewWorkflow::default()
            })
            .await
            .unwrap();
        assert_eq!(workflow.nodes, json!([]));
        assert_eq!(workflow.edges, json!([]));
    }

    #[tokio::test]
    async fn list_enabled_only() {
        let store = setup().await;
        let a = store
            .create(NewWorkflow {
                name: "a".into(),
                ..NewWorkflow::default()
            })
            .await
            .unwrap();
        store
            .create(NewWorkflow {
                name: "b".into(),
                ..NewWorkflow::default()
            })
            .await
            .unwrap();

        store.set_enabled(&a.id, false).await.unwrap();
        assert_eq!(store.list(false).await.unwrap().len(), 2);
        let enabled = store.list(true).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "b");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = setup().await;
        assert!(matches!(
            store.delete("wf_missing").await,
            Err(StoreError::NotFound { entity: "workflow", .. })
        ));
    }

    #[test]
    fn trigger_type_parse() {
        assert_eq!("agent".parse::<TriggerType>().unwrap(), TriggerType::Agent);
        assert!("cron".parse::<TriggerType>().is_err());
    }
}
