//! Registry data types: mounted primitives, requests and operation
//! reports.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolforge_sandbox::PrimitiveHandler;
use toolforge_store::{StoredPlugin, StoredPrimitive, StoredWorkflow, Tier};

use crate::schema::InputSchema;

/// A primitive definition as persisted.
pub type Primitive = StoredPrimitive;
/// A plugin record as persisted.
pub type Plugin = StoredPlugin;
/// A workflow record as persisted.
pub type Workflow = StoredWorkflow;

// ═══════════════════════════════════════════════════════════════════════
//  Mounted primitives
// ═══════════════════════════════════════════════════════════════════════

/// The in-memory, invocable projection of a [`Primitive`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountedPrimitive {
    pub definition: Primitive,
    pub mounted_at: DateTime<Utc>,
    /// Opaque object supplied at mount time, handed to the handler as
    /// `context.config`.
    pub config: Option<Value>,
    pub invocation_count: u64,
    pub last_invoked: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub compiled_handler: Arc<dyn PrimitiveHandler>,
    /// Parsed form of `definition.input_schema`.
    #[serde(skip)]
    pub schema: InputSchema,
}

// ═══════════════════════════════════════════════════════════════════════
//  Requests
// ═══════════════════════════════════════════════════════════════════════

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn default_true() -> bool {
    true
}

/// Fields accepted by `create_primitive`. Also the entry format of a
/// built-in catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrimitiveRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
    pub handler: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Milliseconds; the registry default applies when absent.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub memory: Option<u32>,
    #[serde(default = "default_true")]
    pub sandbox: bool,
    #[serde(default)]
    pub built_in: bool,
    #[serde(default)]
    pub plugin_id: Option<String>,
    /// Mount right after creation. The registry default applies when
    /// absent.
    #[serde(default)]
    pub auto_mount: Option<bool>,
}

impl CreatePrimitiveRequest {
    /// Minimal request: a name and a handler, everything else defaulted.
    pub fn new(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: default_input_schema(),
            handler: handler.into(),
            dependencies: Vec::new(),
            author: None,
            tags: Vec::new(),
            tier: Tier::Free,
            category: None,
            icon: None,
            timeout: None,
            memory: None,
            sandbox: true,
            built_in: false,
            plugin_id: None,
            auto_mount: None,
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    pub fn with_auto_mount(mut self, auto_mount: bool) -> Self {
        self.auto_mount = Some(auto_mount);
        self
    }
}

/// Fields accepted by `update_primitive`. Absent fields keep their
/// current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePrimitiveRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    pub handler: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
    pub tier: Option<Tier>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub timeout: Option<u64>,
    pub memory: Option<u32>,
    pub sandbox: Option<bool>,
    pub enabled: Option<bool>,
    pub plugin_id: Option<String>,
}

impl UpdatePrimitiveRequest {
    pub fn handler(handler: impl Into<String>) -> Self {
        Self {
            handler: Some(handler.into()),
            ..Self::default()
        }
    }
}

/// Fields accepted by `create_plugin`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreatePluginRequest {
    pub name: String,
    /// Derived from `name` when absent.
    pub slug: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub config: Option<Value>,
    pub config_schema: Option<Value>,
    pub built_in: bool,
}

impl CreatePluginRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Which tier `list_primitives` reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMode {
    /// The in-memory mounted table only.
    Mounted,
    /// Stored primitives that are not mounted.
    Available,
    /// Every stored primitive.
    #[default]
    All,
}

/// Filters for `list_primitives`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListOptions {
    pub mode: ListMode,
    pub category: Option<String>,
    /// Any-of tag match.
    pub tags: Vec<String>,
    pub plugin_id: Option<String>,
    /// Case-insensitive substring of name or description.
    pub search: Option<String>,
}

impl ListOptions {
    pub fn mode(mode: ListMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// In-memory equivalent of the store-side filter.
    pub(crate) fn matches(&self, p: &Primitive) -> bool {
        if self.category.as_ref().is_some_and(|c| p.category.as_ref() != Some(c)) {
            return false;
        }
        if self.plugin_id.as_ref().is_some_and(|id| p.plugin_id.as_ref() != Some(id)) {
            return false;
        }
        if !self.tags.is_empty() && !p.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        if let Some(term) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let term = term.to_lowercase();
            return p.name.to_lowercase().contains(&term)
                || p.description.to_lowercase().contains(&term);
        }
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Reports
// ═══════════════════════════════════════════════════════════════════════

/// Result of `create_primitive`. A present `mount_error` means the
/// primitive was created but not mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub primitive_id: String,
    pub mount_error: Option<String>,
}

/// Result of `initialize`. Per-primitive failures never abort the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeReport {
    pub loaded: usize,
    pub mounted: usize,
    pub errors: Vec<String>,
}

/// Result of a plugin enable/disable/delete cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    /// Primitives mounted or dismounted by the cascade.
    pub affected: usize,
    pub errors: Vec<String>,
}

/// Result of `seed_builtins`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub created: usize,
    /// Names already present in the store.
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Aggregate counters returned by `get_stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_primitives: i64,
    pub mounted_primitives: usize,
    pub total_plugins: i64,
    pub enabled_plugins: i64,
    pub total_workflows: i64,
    pub total_executions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn primitive(name: &str) -> Primitive {
        Primitive {
            id: format!("prim_{name}"),
            name: name.to_owned(),
            description: "Formats a Date".into(),
            input_schema: json!({}),
            handler: "return 1;".into(),
            dependencies: Vec::new(),
            author: None,
            tags: vec!["time".into()],
            tier: Tier::Free,
            category: Some("util".into()),
            icon: None,
            timeout_ms: 1000,
            memory_mb: None,
            sandbox: true,
            enabled: true,
            built_in: false,
            plugin_id: Some("plug_a".into()),
            version: "1.0.0".into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn create_request_defaults_from_json() {
        let req: CreatePrimitiveRequest =
            serde_json::from_value(json!({"name": "x", "handler": "return 1;"})).unwrap();
        assert!(req.sandbox);
        assert_eq!(req.tier, Tier::Free);
        assert_eq!(req.input_schema["type"], "object");
        assert!(req.timeout.is_none());
    }

    #[test]
    fn list_options_match_in_memory() {
        let p = primitive("date.format");
        assert!(ListOptions::default().matches(&p));

        let mut opts = ListOptions::mode(ListMode::Mounted);
        opts.search = Some("DATE".into());
        assert!(opts.matches(&p));

        opts.category = Some("text".into());
        assert!(!opts.matches(&p));

        let opts = ListOptions {
            tags: vec!["io".into(), "time".into()],
            plugin_id: Some("plug_a".into()),
            ..ListOptions::default()
        };
        assert!(opts.matches(&p));

        let opts = ListOptions {
            plugin_id: Some("plug_b".into()),
            ..ListOptions::default()
        };
        assert!(!opts.matches(&p));
    }
}
