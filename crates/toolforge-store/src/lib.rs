//! # toolforge-store
//!
//! SQLite persistence for the toolforge primitive engine.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  PrimitiveStore  PluginStore  WorkflowStore  ExecutionLog │
//! ├──────────────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, spawn_blocking closures)    │
//! │  Migrations (versioned, transactional)               │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The store is the durable tier only. The in-memory "hot" tier (mounted
//! primitives, compiled handlers) lives in `toolforge-registry`.
//!
//! ```ignore
//! use toolforge_store::{Database, PrimitiveStore};
//!
//! let db = Database::open_and_migrate("data/toolforge.db").await?;
//! let primitives = PrimitiveStore::new(db.clone());
//! let enabled = primitives.list_enabled().await?;
//! ```

pub mod db;
pub mod error;
pub mod execution_log;
pub mod migration;
pub mod plugin_store;
pub mod primitive_store;
pub mod workflow_store;

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use execution_log::{ExecutionLog, ExecutionRecord, ExecutionStatus};
pub use plugin_store::{NewPlugin, PluginStore, StoredPlugin};
pub use primitive_store::{
    DEFAULT_TIMEOUT_MS, INITIAL_VERSION, NewPrimitive, PrimitiveQuery, PrimitiveStore,
    StoredPrimitive, Tier,
};
pub use workflow_store::{NewWorkflow, StoredWorkflow, TriggerType, WorkflowStore};
