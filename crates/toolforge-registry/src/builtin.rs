//! Built-in catalog seeding.
//!
//! A catalog is host-supplied JSON: either an array of primitive
//! definitions or an object with a `primitives` array. Entries use the
//! [`CreatePrimitiveRequest`] field names. Seeding creates the missing
//! names and never touches rows that already exist, so it is safe to run
//! on every start before [`PrimitiveRegistry::initialize`].

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{RegistryError, Result};
use crate::registry::PrimitiveRegistry;
use crate::types::{CreatePrimitiveRequest, SeedReport};

#[derive(Deserialize)]
#[serde(untagged)]
enum Catalog {
    List(Vec<CreatePrimitiveRequest>),
    Wrapped { primitives: Vec<CreatePrimitiveRequest> },
}

/// Parse a catalog document.
pub fn parse_catalog(json: &str) -> Result<Vec<CreatePrimitiveRequest>> {
    let catalog: Catalog = serde_json::from_str(json)
        .map_err(|e| RegistryError::Validation(format!("invalid built-in catalog: {e}")))?;
    Ok(match catalog {
        Catalog::List(entries) | Catalog::Wrapped { primitives: entries } => entries,
    })
}

impl PrimitiveRegistry {
    /// Create every catalog entry whose name is not stored yet.
    ///
    /// Entries are stored with `built_in = true` and left unmounted;
    /// `initialize` mounts them. Rejected entries land in the report.
    pub async fn seed_builtins(&self, catalog: Vec<CreatePrimitiveRequest>) -> SeedReport {
        let mut report = SeedReport::default();

        for mut entry in catalog {
            let name = entry.name.clone();
            match self.inner.primitives.get_by_name(&name).await {
                Ok(Some(_)) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    report.errors.push(format!("{name}: {}", RegistryError::from(err)));
                    continue;
                }
            }

            entry.built_in = true;
            entry.auto_mount = Some(false);
            match self.create_primitive(entry).await {
                Ok(_) => report.created += 1,
                Err(err) => {
                    warn!(primitive = %name, %err, "failed to seed built-in primitive");
                    report.errors.push(format!("{name}: {err}"));
                }
            }
        }

        info!(
            created = report.created,
            skipped = report.skipped,
            errors = report.errors.len(),
            "built-in catalog seeded"
        );
        report
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use toolforge_sandbox::Sandbox;
    use toolforge_store::Database;

    const CATALOG: &str = r#"{
        "primitives": [
            { "name": "text.upper", "handler": "return String(args.text).toUpperCase();",
              "inputSchema": { "type": "object", "properties": { "text": { "type": "string" } }, "required": ["text"] },
              "category": "text" },
            { "name": "math.add", "handler": "return args.a + args.b;", "timeout": 1000 },
            { "name": "bad.handler", "handler": "return require('fs');" }
        ]
    }"#;

    #[test]
    fn parses_both_shapes() {
        assert_eq!(parse_catalog(CATALOG).unwrap().len(), 3);
        let list = parse_catalog(r#"[{"name": "a", "handler": "return 1;"}]"#).unwrap();
        assert_eq!(list[0].name, "a");
        assert!(list[0].sandbox);
        assert!(parse_catalog(r#"{"name": "a"}"#).is_err());
    }

    #[tokio::test]
    async fn seeding_is_idempotent_and_unmounted() {
        let db = Database::in_memory_migrated().await.unwrap();
        let registry = PrimitiveRegistry::new(db, Sandbox::default(), RegistryConfig::default());

        let report = registry.seed_builtins(parse_catalog(CATALOG).unwrap()).await;
        assert_eq!(report.created, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("bad.handler"));
        assert!(registry.list_mounted().is_empty());

        let stored = registry.get_primitive_by_name("math.add").await.unwrap().unwrap();
        assert!(stored.built_in);
        assert_eq!(stored.timeout_ms, 1000);

        let again = registry.seed_builtins(parse_catalog(CATALOG).unwrap()).await;
        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 2);

        let init = registry.initialize().await;
        assert_eq!(init.mounted, 2);
    }
}
