//! The two-tier primitive registry.
//!
//! The hot tier is three [`DashMap`]s: mounted primitives, known
//! definitions, and the active compiled handler per mounted primitive.
//! The cold tier is the SQLite store, written through on every mutation.
//!
//! Compound mutations (create, update, delete, mount, dismount, plugin
//! cascades) take a registry-wide async mutex so check-then-act
//! sequences cannot interleave. Reads and `record_invocation` go straight
//! to the maps.
//!
//! ```ignore
//! let registry = PrimitiveRegistry::new(db, Sandbox::default(), RegistryConfig::default());
//! let report = registry.initialize().await;
//! let created = registry
//!     .create_primitive(CreatePrimitiveRequest::new("echo.test", "return args.value;"))
//!     .await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use toolforge_sandbox::{PrimitiveHandler, Sandbox, SandboxMode};
use toolforge_store::{
    DEFAULT_TIMEOUT_MS, Database, ExecutionLog, ExecutionRecord, NewPrimitive, PluginStore, PrimitiveQuery,
    PrimitiveStore, WorkflowStore,
};

use crate::error::{RegistryError, Result};
use crate::schema::InputSchema;
use crate::types::{
    CreateOutcome, CreatePrimitiveRequest, InitializeReport, ListMode, ListOptions,
    MountedPrimitive, Primitive, RegistryStats, UpdatePrimitiveRequest,
};

/// Registry-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Timeout given to primitives created without one.
    pub default_timeout_ms: u64,
    /// Whether `create_primitive` mounts unless the request says otherwise.
    pub auto_mount: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            auto_mount: true,
        }
    }
}

impl RegistryConfig {
    pub fn with_default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    pub fn with_auto_mount(mut self, auto_mount: bool) -> Self {
        self.auto_mount = auto_mount;
        self
    }
}

pub(crate) struct Inner {
    pub(crate) primitives: PrimitiveStore,
    pub(crate) plugins: PluginStore,
    pub(crate) workflows: WorkflowStore,
    pub(crate) executions: ExecutionLog,
    pub(crate) sandbox: Sandbox,
    config: RegistryConfig,

    pub(crate) mounted: DashMap<String, MountedPrimitive>,
    pub(crate) primitive_cache: DashMap<String, Primitive>,
    pub(crate) handler_cache: DashMap<String, Arc<dyn PrimitiveHandler>>,
    initialized: AtomicBool,

    /// Serializes compound mutations.
    pub(crate) ops: Mutex<()>,
}

/// Owner of primitive, plugin and workflow lifecycles.
///
/// Cheap to clone; clones share state. Build a new one to start from a
/// clean hot tier.
#[derive(Clone)]
pub struct PrimitiveRegistry {
    pub(crate) inner: Arc<Inner>,
}

impl PrimitiveRegistry {
    pub fn new(db: Database, sandbox: Sandbox, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                primitives: PrimitiveStore::new(db.clone()),
                plugins: PluginStore::new(db.clone()),
                workflows: WorkflowStore::new(db.clone()),
                executions: ExecutionLog::new(db),
                sandbox,
                config,
                mounted: DashMap::new(),
                primitive_cache: DashMap::new(),
                handler_cache: DashMap::new(),
                initialized: AtomicBool::new(false),
                ops: Mutex::new(()),
            }),
        }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.inner.sandbox
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn execution_log(&self) -> &ExecutionLog {
        &self.inner.executions
    }

    // ── initialization ───────────────────────────────────────────────

    /// Load every enabled primitive from the store and try to mount it.
    ///
    /// Runs once; later calls return an empty report without touching
    /// the store.
    pub async fn initialize(&self) -> InitializeReport {
        let _guard = self.inner.ops.lock().await;
        if self.is_initialized() {
            return InitializeReport::default();
        }

        let mut report = InitializeReport::default();
        match self.inner.primitives.list_enabled().await {
            Ok(records) => {
                for primitive in records {
                    report.loaded += 1;
                    let (id, name) = (primitive.id.clone(), primitive.name.clone());
                    self.inner.primitive_cache.insert(id.clone(), primitive);
                    match self.mount_locked(&id, None).await {
                        Ok(()) => report.mounted += 1,
                        Err(err) => {
                            warn!(primitive = %name, %err, "failed to mount primitive during initialize");
                            report.errors.push(format!("{name}: {err}"));
                        }
                    }
                }
            }
            Err(err) => {
                warn!(%err, "failed to load primitives during initialize");
                report
                    .errors
                    .push(RegistryError::from(err).to_string());
            }
        }

        self.inner.initialized.store(true, Ordering::Release);
        info!(
            loaded = report.loaded,
            mounted = report.mounted,
            errors = report.errors.len(),
            "registry initialized"
        );
        report
    }

    // ── primitive lifecycle ──────────────────────────────────────────

    /// Admit, persist and (by default) mount a new primitive.
    ///
    /// A mount failure after the record is stored is reported in
    /// [`CreateOutcome::mount_error`]; creation is not rolled back.
    pub async fn create_primitive(&self, req: CreatePrimitiveRequest) -> Result<CreateOutcome> {
        let _guard = self.inner.ops.lock().await;

        if req.name.trim().is_empty() {
            return Err(RegistryError::Validation("primitive name must not be empty".into()));
        }
        self.admit(&req.handler, SandboxMode::from_flag(req.sandbox))
            .await?;
        InputSchema::from_value(&req.input_schema).map_err(RegistryError::Validation)?;
        if self.inner.primitives.get_by_name(&req.name).await?.is_some() {
            return Err(RegistryError::AlreadyExists {
                entity: "primitive",
                name: req.name,
            });
        }
        if let Some(plugin_id) = &req.plugin_id {
            if self.inner.plugins.get(plugin_id).await?.is_none() {
                return Err(RegistryError::NotFound {
                    entity: "plugin",
                    id: plugin_id.clone(),
                });
            }
        }

        let auto_mount = req.auto_mount.unwrap_or(self.inner.config.auto_mount);
        let name = req.name.clone();
        let new = NewPrimitive {
            name: req.name,
            description: req.description,
            input_schema: req.input_schema,
            handler: req.handler,
            dependencies: req.dependencies,
            author: req.author,
            tags: req.tags,
            tier: req.tier,
            category: req.category,
            icon: req.icon,
            timeout_ms: req.timeout.unwrap_or(self.inner.config.default_timeout_ms),
            memory_mb: req.memory,
            sandbox: req.sandbox,
            enabled: true,
            built_in: req.built_in,
            plugin_id: req.plugin_id,
        };
        let record = self.inner.primitives.create(new).await.map_err(|err| {
            if err.is_unique_violation() {
                RegistryError::AlreadyExists {
                    entity: "primitive",
                    name: name.clone(),
                }
            } else {
                err.into()
            }
        })?;

        let id = record.id.clone();
        self.inner.primitive_cache.insert(id.clone(), record);
        info!(primitive_id = %id, %name, "primitive created");

        let mount_error = if auto_mount {
            self.mount_locked(&id, None)
                .await
                .err()
                .map(|err| err.to_string())
        } else {
            None
        };
        if let Some(err) = &mount_error {
            warn!(primitive_id = %id, %err, "primitive created but not mounted");
        }

        Ok(CreateOutcome {
            primitive_id: id,
            mount_error,
        })
    }

    /// Apply the present fields of `req`, bump the patch version and
    /// re-mount if the primitive was mounted.
    pub async fn update_primitive(&self, id: &str, req: UpdatePrimitiveRequest) -> Result<Primitive> {
        let _guard = self.inner.ops.lock().await;

        let mut record = self
            .resolve_definition(id)
            .await?
            .ok_or_else(|| RegistryError::primitive_not_found(id))?;

        let sandbox = req.sandbox.unwrap_or(record.sandbox);
        if let Some(handler) = &req.handler {
            self.admit(handler, SandboxMode::from_flag(sandbox)).await?;
        }
        if let Some(schema) = &req.input_schema {
            InputSchema::from_value(schema).map_err(RegistryError::Validation)?;
        }
        if let Some(name) = req.name.as_ref().filter(|n| **n != record.name) {
            if name.trim().is_empty() {
                return Err(RegistryError::Validation("primitive name must not be empty".into()));
            }
            if self.inner.primitives.get_by_name(name).await?.is_some() {
                return Err(RegistryError::AlreadyExists {
                    entity: "primitive",
                    name: name.clone(),
                });
            }
        }

        macro_rules! apply {
            ($($field:ident => $target:ident),* $(,)?) => {
                $(if let Some(value) = req.$field { record.$target = value; })*
            };
        }
        apply! {
            name => name,
            description => description,
            input_schema => input_schema,
            handler => handler,
            dependencies => dependencies,
            tags => tags,
            tier => tier,
            timeout => timeout_ms,
            sandbox => sandbox,
            enabled => enabled,
        }
        if req.author.is_some() {
            record.author = req.author;
        }
        if req.category.is_some() {
            record.category = req.category;
        }
        if req.icon.is_some() {
            record.icon = req.icon;
        }
        if req.memory.is_some() {
            record.memory_mb = req.memory;
        }
        if req.plugin_id.is_some() {
            record.plugin_id = req.plugin_id;
        }
        record.version = bump_patch(&record.version);

        let updated = self.inner.primitives.update(&record).await?;
        self.inner
            .primitive_cache
            .insert(updated.id.clone(), updated.clone());
        self.inner.handler_cache.remove(&updated.id);
        self.inner.sandbox.invalidate(&updated.id);
        info!(primitive_id = %updated.id, version = %updated.version, "primitive updated");

        let previous_config = self
            .inner
            .mounted
            .get(&updated.id)
            .map(|m| m.config.clone());
        if let Some(config) = previous_config {
            self.dismount_locked(&updated.id)?;
            if let Err(err) = self.mount_locked(&updated.id, config).await {
                warn!(primitive_id = %updated.id, %err, "re-mount after update failed");
                return Err(RegistryError::RemountFailed {
                    id: updated.id,
                    reason: err.to_string(),
                });
            }
        }

        Ok(updated)
    }

    /// Delete a primitive. A mounted primitive is only deleted with
    /// `force`, which dismounts it first.
    pub async fn delete_primitive(&self, id: &str, force: bool) -> Result<()> {
        let _guard = self.inner.ops.lock().await;

        if self.inner.mounted.contains_key(id) {
            if !force {
                return Err(RegistryError::MountedDeleteRefused(id.to_owned()));
            }
            self.dismount_locked(id)?;
        }

        self.inner.primitives.delete(id).await?;
        self.purge(id);
        info!(primitive_id = %id, force, "primitive deleted");
        Ok(())
    }

    /// Compile a known primitive and make it invocable.
    ///
    /// The definition must already be in the hot tier; mount never reads
    /// the store.
    pub async fn mount_primitive(&self, id: &str, config: Option<Value>) -> Result<()> {
        let _guard = self.inner.ops.lock().await;
        self.mount_locked(id, config).await
    }

    pub async fn dismount_primitive(&self, id: &str) -> Result<()> {
        let _guard = self.inner.ops.lock().await;
        self.dismount_locked(id)
    }

    /// Caller must hold `ops`.
    pub(crate) async fn mount_locked(&self, id: &str, config: Option<Value>) -> Result<()> {
        let definition = self
            .inner
            .primitive_cache
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::primitive_not_found(id))?;
        if self.inner.mounted.contains_key(id) {
            return Err(RegistryError::AlreadyMounted(id.to_owned()));
        }

        let schema =
            InputSchema::from_value(&definition.input_schema).map_err(RegistryError::Validation)?;
        let handler: Arc<dyn PrimitiveHandler> = self
            .inner
            .sandbox
            .compile_cached(id, &definition.handler, SandboxMode::from_flag(definition.sandbox))
            .await?;

        self.inner
            .handler_cache
            .insert(id.to_owned(), Arc::clone(&handler));
        let name = definition.name.clone();
        self.inner.mounted.insert(
            id.to_owned(),
            MountedPrimitive {
                definition,
                mounted_at: Utc::now(),
                config,
                invocation_count: 0,
                last_invoked: None,
                compiled_handler: handler,
                schema,
            },
        );
        info!(primitive_id = %id, %name, "primitive mounted");
        Ok(())
    }

    /// Caller must hold `ops`.
    pub(crate) fn dismount_locked(&self, id: &str) -> Result<()> {
        if self.inner.mounted.remove(id).is_none() {
            return Err(RegistryError::NotMounted(id.to_owned()));
        }
        self.inner.handler_cache.remove(id);
        self.inner.sandbox.invalidate(id);
        info!(primitive_id = %id, "primitive dismounted");
        Ok(())
    }

    /// Drop `id` from every hot-tier map except `mounted`.
    pub(crate) fn purge(&self, id: &str) {
        self.inner.primitive_cache.remove(id);
        self.inner.handler_cache.remove(id);
        self.inner.sandbox.invalidate(id);
    }

    /// Security gate plus compile check, without caching.
    async fn admit(&self, code: &str, mode: SandboxMode) -> Result<()> {
        let report = self.inner.sandbox.validate(code);
        if !report.safe {
            return Err(RegistryError::SecurityRejected {
                reasons: report.blocked,
            });
        }
        self.inner.sandbox.compile(code, mode).await?;
        Ok(())
    }

    // ── lookups ──────────────────────────────────────────────────────

    /// Mounted primitive by id, else by exact name.
    pub fn get_mounted_primitive(&self, id_or_name: &str) -> Option<MountedPrimitive> {
        if let Some(entry) = self.inner.mounted.get(id_or_name) {
            return Some(entry.value().clone());
        }
        self.inner
            .mounted
            .iter()
            .find(|entry| entry.definition.name == id_or_name)
            .map(|entry| entry.value().clone())
    }

    pub fn is_mounted(&self, id: &str) -> bool {
        self.inner.mounted.contains_key(id)
    }

    /// Active compiled handler of a mounted primitive.
    pub fn handler(&self, id: &str) -> Option<Arc<dyn PrimitiveHandler>> {
        self.inner
            .handler_cache
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Count an invocation. No-op for primitives that are not mounted.
    pub fn record_invocation(&self, id: &str) {
        if let Some(mut entry) = self.inner.mounted.get_mut(id) {
            entry.invocation_count += 1;
            entry.last_invoked = Some(Utc::now());
        }
    }

    /// Definition by id: hot tier first, then the store.
    pub async fn get_primitive(&self, id: &str) -> Result<Option<Primitive>> {
        self.resolve_definition(id).await
    }

    pub async fn get_primitive_by_name(&self, name: &str) -> Result<Option<Primitive>> {
        let cached = self
            .inner
            .primitive_cache
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value().clone());
        if cached.is_some() {
            return Ok(cached);
        }
        Ok(self.inner.primitives.get_by_name(name).await?)
    }

    /// Snapshot of the mounted table, ordered by name.
    pub fn list_mounted(&self) -> Vec<MountedPrimitive> {
        let mut mounted: Vec<MountedPrimitive> = self
            .inner
            .mounted
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        mounted.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        mounted
    }

    pub async fn list_primitives(&self, options: &ListOptions) -> Result<Vec<Primitive>> {
        if options.mode == ListMode::Mounted {
            let mut primitives: Vec<Primitive> = self
                .inner
                .mounted
                .iter()
                .filter(|entry| options.matches(&entry.definition))
                .map(|entry| entry.definition.clone())
                .collect();
            primitives.sort_by(|a, b| a.name.cmp(&b.name));
            return Ok(primitives);
        }

        let query = PrimitiveQuery {
            category: options.category.clone(),
            tags: options.tags.clone(),
            plugin_id: options.plugin_id.clone(),
            // SQL `lower()` folds ASCII only; search is matched here so every
            // mode folds case the same way.
            search: None,
            enabled: None,
        };
        let records = self.inner.primitives.list(&query).await?;
        let primitives: Vec<Primitive> = records
            .into_iter()
            .filter(|p| options.matches(p))
            .filter(|p| {
                options.mode != ListMode::Available || !self.inner.mounted.contains_key(&p.id)
            })
            .collect();
        debug!(count = primitives.len(), mode = ?options.mode, "listed primitives from store");
        Ok(primitives)
    }

    async fn resolve_definition(&self, id: &str) -> Result<Option<Primitive>> {
        if let Some(entry) = self.inner.primitive_cache.get(id) {
            return Ok(Some(entry.value().clone()));
        }
        let record = self.inner.primitives.get(id).await?;
        if let Some(record) = &record {
            debug!(primitive_id = %id, "hydrated primitive from store");
            self.inner
                .primitive_cache
                .insert(record.id.clone(), record.clone());
        }
        Ok(record)
    }

    /// Latest logged executions of one primitive, newest first.
    pub async fn recent_executions(&self, id: &str, limit: i64) -> Result<Vec<ExecutionRecord>> {
        Ok(self.inner.executions.recent(id, limit).await?)
    }

    // ── stats ────────────────────────────────────────────────────────

    pub async fn get_stats(&self) -> Result<RegistryStats> {
        Ok(RegistryStats {
            total_primitives: self.inner.primitives.count().await?,
            mounted_primitives: self.inner.mounted.len(),
            total_plugins: self.inner.plugins.count().await?,
            enabled_plugins: self.inner.plugins.count_enabled().await?,
            total_workflows: self.inner.workflows.count().await?,
            total_executions: self.inner.executions.count().await?,
        })
    }
}

/// `"1.2.3"` -> `"1.2.4"`. Missing or unparseable parts count as 0.
pub(crate) fn bump_patch(version: &str) -> String {
    let mut parts = version
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    format!("{major}.{minor}.{}", patch.saturating_add(1))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    async fn registry() -> PrimitiveRegistry {
        let db = Database::in_memory_migrated().await.unwrap();
        PrimitiveRegistry::new(db, Sandbox::default(), RegistryConfig::default())
    }

    fn echo() -> CreatePrimitiveRequest {
        CreatePrimitiveRequest::new("echo.test", "return args.value;").with_input_schema(json!({
            "type": "object",
            "properties": { "value": { "type": "string" } },
            "required": ["value"]
        }))
    }

    #[test]
    fn bump_patch_cases() {
        assert_eq!(bump_patch("1.0.0"), "1.0.1");
        assert_eq!(bump_patch("2.3.9"), "2.3.10");
        assert_eq!(bump_patch("1.0"), "1.0.1");
        assert_eq!(bump_patch("garbage"), "0.0.1");
    }

    #[tokio::test]
    async fn create_mounts_by_default() {
        let registry = registry().await;
        let outcome = registry.create_primitive(echo()).await.unwrap();
        assert!(outcome.mount_error.is_none());
        assert!(registry.is_mounted(&outcome.primitive_id));
        assert!(registry.handler(&outcome.primitive_id).is_some());

        let mounted = registry.get_mounted_primitive("echo.test").unwrap();
        assert_eq!(mounted.definition.id, outcome.primitive_id);
        assert_eq!(mounted.invocation_count, 0);
        assert_eq!(mounted.definition.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn config_defaults_apply_to_requests() {
        let db = Database::in_memory_migrated().await.unwrap();
        let config = RegistryConfig::default()
            .with_default_timeout_ms(1_500)
            .with_auto_mount(false);
        let registry = PrimitiveRegistry::new(db, Sandbox::default(), config);

        let id = registry.create_primitive(echo()).await.unwrap().primitive_id;
        assert!(!registry.is_mounted(&id));
        let stored = registry.get_primitive(&id).await.unwrap().unwrap();
        assert_eq!(stored.timeout_ms, 1_500);

        let id = registry
            .create_primitive(
                CreatePrimitiveRequest::new("forced.mount", "return 1;").with_auto_mount(true),
            )
            .await
            .unwrap()
            .primitive_id;
        assert!(registry.is_mounted(&id));
    }

    #[tokio::test]
    async fn create_can_skip_mount() {
        let registry = registry().await;
        let outcome = registry
            .create_primitive(echo().with_auto_mount(false))
            .await
            .unwrap();
        assert!(!registry.is_mounted(&outcome.primitive_id));
        assert!(registry.get_primitive(&outcome.primitive_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_name_is_conflict() {
        let registry = registry().await;
        registry.create_primitive(echo()).await.unwrap();
        let err = registry.create_primitive(echo()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn unsafe_or_broken_handlers_never_reach_the_store() {
        let registry = registry().await;
        let err = registry
            .create_primitive(CreatePrimitiveRequest::new("bad.one", "return process.env;"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);

        let err = registry
            .create_primitive(CreatePrimitiveRequest::new("bad.two", "return (;"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compilation);

        assert_eq!(registry.get_stats().await.unwrap().total_primitives, 0);
    }

    #[tokio::test]
    async fn invalid_schema_is_validation_error() {
        let registry = registry().await;
        let err = registry
            .create_primitive(
                CreatePrimitiveRequest::new("bad.schema", "return 1;")
                    .with_input_schema(json!({"type": "string"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unknown_plugin_is_not_found() {
        let registry = registry().await;
        let err = registry
            .create_primitive(echo().with_plugin("plug_missing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn mount_requires_hot_tier_and_is_not_idempotent() {
        let registry = registry().await;
        let err = registry.mount_primitive("prim_unknown", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let id = registry.create_primitive(echo()).await.unwrap().primitive_id;
        let err = registry.mount_primitive(&id, None).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyMounted(_)));

        registry.dismount_primitive(&id).await.unwrap();
        let err = registry.dismount_primitive(&id).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotMounted(_)));
        assert!(registry.handler(&id).is_none());

        registry
            .mount_primitive(&id, Some(json!({"locale": "en"})))
            .await
            .unwrap();
        let mounted = registry.get_mounted_primitive(&id).unwrap();
        assert_eq!(mounted.config, Some(json!({"locale": "en"})));
    }

    #[tokio::test]
    async fn update_bumps_version_and_keeps_unset_fields() {
        let registry = registry().await;
        let id = registry.create_primitive(echo()).await.unwrap().primitive_id;

        let updated = registry
            .update_primitive(
                &id,
                UpdatePrimitiveRequest {
                    description: Some("echoes".into()),
                    ..UpdatePrimitiveRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, "1.0.1");
        assert_eq!(updated.description, "echoes");
        assert_eq!(updated.handler, "return args.value;");
        assert!(registry.is_mounted(&id));
    }

    #[tokio::test]
    async fn update_rejects_unsafe_handler_without_persisting() {
        let registry = registry().await;
        let id = registry.create_primitive(echo()).await.unwrap().primitive_id;
        let err = registry
            .update_primitive(&id, UpdatePrimitiveRequest::handler("return eval('1');"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);

        let stored = registry.get_primitive(&id).await.unwrap().unwrap();
        assert_eq!(stored.version, "1.0.0");
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let registry = registry().await;
        let err = registry
            .update_primitive("prim_missing", UpdatePrimitiveRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn record_invocation_counts_only_mounted() {
        let registry = registry().await;
        let id = registry.create_primitive(echo()).await.unwrap().primitive_id;
        registry.record_invocation(&id);
        registry.record_invocation(&id);
        registry.record_invocation("prim_unmounted");

        let mounted = registry.get_mounted_primitive(&id).unwrap();
        assert_eq!(mounted.invocation_count, 2);
        assert!(mounted.last_invoked.is_some());
    }

    #[tokio::test]
    async fn list_modes() {
        let registry = registry().await;
        registry.create_primitive(echo()).await.unwrap();
        registry
            .create_primitive(
                CreatePrimitiveRequest::new("idle.one", "return 1;").with_auto_mount(false),
            )
            .await
            .unwrap();

        let mounted = registry
            .list_primitives(&ListOptions::mode(ListMode::Mounted))
            .await
            .unwrap();
        let available = registry
            .list_primitives(&ListOptions::mode(ListMode::Available))
            .await
            .unwrap();
        let all = registry
            .list_primitives(&ListOptions::mode(ListMode::All))
            .await
            .unwrap();

        assert_eq!(mounted.len(), 1);
        assert_eq!(mounted[0].name, "echo.test");
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "idle.one");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_collects_errors() {
        let db = Database::in_memory_migrated().await.unwrap();
        let store = PrimitiveStore::new(db.clone());
        let mut bad = NewPrimitive {
            name: "stored.bad".into(),
            description: String::new(),
            input_schema: json!({}),
            handler: "return (;".into(),
            dependencies: Vec::new(),
            author: None,
            tags: Vec::new(),
            tier: Default::default(),
            category: None,
            icon: None,
            timeout_ms: 1000,
            memory_mb: None,
            sandbox: true,
            enabled: true,
            built_in: false,
            plugin_id: None,
        };
        store.create(bad.clone()).await.unwrap();
        bad.name = "stored.good".into();
        bad.handler = "return 1;".into();
        store.create(bad.clone()).await.unwrap();
        bad.name = "stored.disabled".into();
        bad.enabled = false;
        store.create(bad).await.unwrap();

        let registry = PrimitiveRegistry::new(db, Sandbox::default(), RegistryConfig::default());
        let report = registry.initialize().await;
        assert_eq!(report.loaded, 2);
        assert_eq!(report.mounted, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("stored.bad"));
        assert!(registry.is_initialized());

        let again = registry.initialize().await;
        assert_eq!(again, InitializeReport::default());
    }

    #[tokio::test]
    async fn stats_count_every_table() {
        let registry = registry().await;
        registry.create_primitive(echo()).await.unwrap();
        let stats = registry.get_stats().await.unwrap();
        assert_eq!(stats.total_primitives, 1);
        assert_eq!(stats.mounted_primitives, 1);
        assert_eq!(stats.total_plugins, 0);
        assert_eq!(stats.total_executions, 0);
    }
}
