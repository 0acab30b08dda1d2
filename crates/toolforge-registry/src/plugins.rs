//! Plugin lifecycle and the plugin-to-primitive cascades.

use tracing::{info, warn};

use toolforge_store::NewPlugin;

use crate::error::{RegistryError, Result};
use crate::registry::PrimitiveRegistry;
use crate::types::{CascadeReport, CreatePluginRequest, Plugin};

/// Lowercase ASCII alphanumerics, every other run collapsed to `-`,
/// trimmed of leading and trailing dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_owned()
}

impl PrimitiveRegistry {
    /// Store a new, disabled plugin.
    pub async fn create_plugin(&self, req: CreatePluginRequest) -> Result<Plugin> {
        let _guard = self.inner.ops.lock().await;

        if req.name.trim().is_empty() {
            return Err(RegistryError::Validation("plugin name must not be empty".into()));
        }
        let slug = req.slug.clone().unwrap_or_else(|| slugify(&req.name));
        if slug.is_empty() {
            return Err(RegistryError::Validation(format!(
                "cannot derive a slug from plugin name {:?}",
                req.name
            )));
        }
        if self.inner.plugins.get_by_name(&req.name).await?.is_some() {
            return Err(RegistryError::AlreadyExists {
                entity: "plugin",
                name: req.name,
            });
        }
        if self.inner.plugins.get_by_slug(&slug).await?.is_some() {
            return Err(RegistryError::AlreadyExists {
                entity: "plugin",
                name: slug,
            });
        }

        let plugin = self
            .inner
            .plugins
            .create(NewPlugin {
                name: req.name,
                slug,
                description: req.description,
                icon: req.icon,
                color: req.color,
                version: req.version,
                author: req.author,
                config: req.config,
                config_schema: req.config_schema,
                built_in: req.built_in,
            })
            .await?;
        info!(plugin_id = %plugin.id, slug = %plugin.slug, "plugin created");
        Ok(plugin)
    }

    pub async fn get_plugin(&self, id: &str) -> Result<Option<Plugin>> {
        Ok(self.inner.plugins.get(id).await?)
    }

    pub async fn get_plugin_by_slug(&self, slug: &str) -> Result<Option<Plugin>> {
        Ok(self.inner.plugins.get_by_slug(slug).await?)
    }

    pub async fn list_plugins(&self) -> Result<Vec<Plugin>> {
        Ok(self.inner.plugins.list().await?)
    }

    /// Persist the flag, then mount (enable) or dismount (disable) the
    /// plugin's primitives. Per-primitive failures land in the report.
    pub async fn set_plugin_enabled(&self, id: &str, enabled: bool) -> Result<CascadeReport> {
        let _guard = self.inner.ops.lock().await;

        self.inner.plugins.set_enabled(id, enabled).await?;
        let owned = self.inner.primitives.list_by_plugin(id).await?;
        let mut report = CascadeReport::default();

        for primitive in owned {
            let pid = primitive.id.clone();
            let name = primitive.name.clone();
            if enabled {
                if !primitive.enabled || self.is_mounted(&pid) {
                    continue;
                }
                self.inner.primitive_cache.insert(pid.clone(), primitive);
                match self.mount_locked(&pid, None).await {
                    Ok(()) => report.affected += 1,
                    Err(err) => {
                        warn!(plugin_id = %id, primitive = %name, %err, "cascade mount failed");
                        report.errors.push(format!("{name}: {err}"));
                    }
                }
            } else if self.is_mounted(&pid) {
                match self.dismount_locked(&pid) {
                    Ok(()) => report.affected += 1,
                    Err(err) => report.errors.push(format!("{name}: {err}")),
                }
            }
        }

        info!(plugin_id = %id, enabled, affected = report.affected, "plugin toggled");
        Ok(report)
    }

    /// Dismount and forget the plugin's primitives, then delete the plugin.
    /// The store removes the primitive rows with it.
    pub async fn delete_plugin(&self, id: &str) -> Result<CascadeReport> {
        let _guard = self.inner.ops.lock().await;

        if self.inner.plugins.get(id).await?.is_none() {
            return Err(RegistryError::NotFound {
                entity: "plugin",
                id: id.to_owned(),
            });
        }

        let owned = self.inner.primitives.list_by_plugin(id).await?;
        let mut report = CascadeReport::default();
        for primitive in &owned {
            if self.is_mounted(&primitive.id) {
                if let Err(err) = self.dismount_locked(&primitive.id) {
                    report.errors.push(format!("{}: {err}", primitive.name));
                }
            }
            self.purge(&primitive.id);
            report.affected += 1;
        }

        self.inner.plugins.delete(id).await?;
        info!(plugin_id = %id, removed = report.affected, "plugin deleted");
        Ok(report)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::RegistryConfig;
    use crate::types::CreatePrimitiveRequest;
    use toolforge_sandbox::Sandbox;
    use toolforge_store::Database;

    async fn registry() -> PrimitiveRegistry {
        let db = Database::in_memory_migrated().await.unwrap();
        PrimitiveRegistry::new(db, Sandbox::default(), RegistryConfig::default())
    }

    #[test]
    fn slugify_cases() {
        assert_eq!(slugify("Text Tools"), "text-tools");
        assert_eq!(slugify("  HTTP / JSON  utils!"), "http-json-utils");
        assert_eq!(slugify("---"), "");
    }

    #[tokio::test]
    async fn create_derives_slug_and_rejects_duplicates() {
        let registry = registry().await;
        let plugin = registry
            .create_plugin(CreatePluginRequest::new("Text Tools"))
            .await
            .unwrap();
        assert_eq!(plugin.slug, "text-tools");
        assert!(!plugin.enabled);
        let by_slug = registry.get_plugin_by_slug("text-tools").await.unwrap().unwrap();
        assert_eq!(by_slug.id, plugin.id);

        let err = registry
            .create_plugin(CreatePluginRequest::new("Text Tools"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let mut same_slug = CreatePluginRequest::new("Other");
        same_slug.slug = Some("text-tools".into());
        let err = registry.create_plugin(same_slug).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = registry
            .create_plugin(CreatePluginRequest::new("!!!"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn toggle_cascades_to_primitives() {
        let registry = registry().await;
        let plugin = registry
            .create_plugin(CreatePluginRequest::new("Math"))
            .await
            .unwrap();
        let a = registry
            .create_primitive(CreatePrimitiveRequest::new("math.one", "return 1;").with_plugin(&plugin.id))
            .await
            .unwrap()
            .primitive_id;
        let b = registry
            .create_primitive(CreatePrimitiveRequest::new("math.two", "return 2;").with_plugin(&plugin.id))
            .await
            .unwrap()
            .primitive_id;

        let report = registry.set_plugin_enabled(&plugin.id, false).await.unwrap();
        assert_eq!(report.affected, 2);
        assert!(!registry.is_mounted(&a) && !registry.is_mounted(&b));

        let report = registry.set_plugin_enabled(&plugin.id, true).await.unwrap();
        assert_eq!(report.affected, 2);
        assert!(report.errors.is_empty());
        assert!(registry.is_mounted(&a) && registry.is_mounted(&b));
        assert!(registry.get_plugin(&plugin.id).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn delete_removes_owned_primitives() {
        let registry = registry().await;
        let plugin = registry
            .create_plugin(CreatePluginRequest::new("Doomed"))
            .await
            .unwrap();
        let id = registry
            .create_primitive(CreatePrimitiveRequest::new("doomed.one", "return 1;").with_plugin(&plugin.id))
            .await
            .unwrap()
            .primitive_id;

        let report = registry.delete_plugin(&plugin.id).await.unwrap();
        assert_eq!(report.affected, 1);
        assert!(!registry.is_mounted(&id));
        assert!(registry.get_primitive(&id).await.unwrap().is_none());
        assert!(registry.list_plugins().await.unwrap().is_empty());

        let err = registry.delete_plugin(&plugin.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn toggle_unknown_plugin_is_not_found() {
        let registry = registry().await;
        let err = registry.set_plugin_enabled("plug_missing", true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
