//! Primitive registry and execution façade for toolforge.
//!
//! ```text
//!   PrimitiveExecutor ──execute──▶ PrimitiveRegistry ──run──▶ Sandbox
//!                                   │  hot tier (DashMap)
//!                                   │  mounted / definitions / handlers
//!                                   ▼
//!                                 toolforge-store (SQLite)
//! ```
//!
//! - **[`registry`]** -- primitive lifecycle, lookups and stats.
//! - **[`plugins`]** -- plugin lifecycle and enable/disable cascades.
//! - **[`workflows`]** -- workflow record maintenance.
//! - **[`builtin`]** -- built-in catalog parsing and seeding.
//! - **[`executor`]** -- the invocation entry point.
//! - **[`schema`]** -- input-schema validation of execution arguments.

pub mod builtin;
pub mod error;
pub mod executor;
pub mod plugins;
pub mod registry;
pub mod schema;
pub mod types;
pub mod workflows;

pub use builtin::parse_catalog;
pub use error::{ErrorKind, RegistryError, Result};
pub use executor::{
    ExecutionContext, ExecutionOptions, ExecutionResult, Platform, PrimitiveExecutor,
    new_invocation_id,
};
pub use plugins::slugify;
pub use registry::{PrimitiveRegistry, RegistryConfig};
pub use schema::{InputSchema, JsonSchemaProperty, SchemaType, ValidationErrors, Violation};
pub use types::{
    CascadeReport, CreateOutcome, CreatePluginRequest, CreatePrimitiveRequest, InitializeReport,
    ListMode, ListOptions, MountedPrimitive, Plugin, Primitive, RegistryStats, SeedReport,
    UpdatePrimitiveRequest, Workflow,
};
