//! Append-only log of primitive invocations.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Outcome of a logged invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidColumn {
                column: "status",
                value: other.to_owned(),
            }),
        }
    }
}

/// One row of the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub primitive_id: String,
    pub invocation_id: String,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub created_at: i64,
}

/// Writer/reader for the `primitive_executions` table.
#[derive(Clone)]
pub struct ExecutionLog {
    db: Database,
}

impl ExecutionLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one invocation outcome.
    #[instrument(skip(self, error))]
    pub async fn record(
        &self,
        primitive_id: &str,
        invocation_id: &str,
        status: ExecutionStatus,
        error: Option<&str>,
        execution_time_ms: u64,
    ) -> StoreResult<ExecutionRecord> {
        let record = ExecutionRecord {
            id: format!("exec_{}", Uuid::now_v7().simple()),
            primitive_id: primitive_id.to_owned(),
            invocation_id: invocation_id.to_owned(),
            status,
            error: error.map(str::to_owned),
            execution_time_ms,
            created_at: Utc::now().timestamp_millis(),
        };

        let row = record.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO primitive_executions \
                     (id, primitive_id, invocation_id, status, error, execution_time_ms, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        row.id,
                        row.primitive_id,
                        row.invocation_id,
                        row.status.as_str(),
                        row.error,
                        row.execution_time_ms as i64,
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(record)
    }

    /// Most recent executions of one primitive, newest first.
    #[instrument(skip(self))]
    pub async fn recent(&self, primitive_id: &str, limit: i64) -> StoreResult<Vec<ExecutionRecord>> {
        let primitive_id = primitive_id.to_owned();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, primitive_id, invocation_id, status, error, execution_time_ms, created_at \
                     FROM primitive_executions WHERE primitive_id = ?1 \
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![primitive_id, limit], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, i64>(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(id, primitive_id, invocation_id, status, error, time, created_at)| {
                        Ok(ExecutionRecord {
                            id,
                            primitive_id,
                            invocation_id,
                            status: ExecutionStatus::parse(&status)?,
                            error,
                            execution_time_ms: u64::try_from(time).unwrap_or_default(),
                            created_at,
                        })
                    })
                    .collect()
            })
            .await
    }

    /// Total number of logged executions.
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM primitive_executions", [], |row| {
                    row.get(0)
                })?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_and_read_back() {
        let log = ExecutionLog::new(Database::in_memory_migrated().await.unwrap());

        log.record("prim_a", "inv_1", ExecutionStatus::Success, None, 12)
            .await
            .unwrap();
        log.record("prim_a", "inv_2", ExecutionStatus::Failed, Some("boom"), 3)
            .await
            .unwrap();
        log.record("prim_b", "inv_3", ExecutionStatus::Success, None, 1)
            .await
            .unwrap();

        assert_eq!(log.count().await.unwrap(), 3);

        let recent = log.recent("prim_a", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        let failed = recent
            .iter()
            .find(|r| r.invocation_id == "inv_2")
            .unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        assert_eq!(log.recent("prim_a", 1).await.unwrap().len(), 1);
    }
}
