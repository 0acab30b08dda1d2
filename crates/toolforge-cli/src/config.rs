//! Configuration file loading.
//!
//! Reads `config/toolforge.toml` (or the `--config` path). A missing file
//! yields the defaults; a malformed one is an error. `TOOLFORGE_DB`
//! overrides the database path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use toolforge_registry::RegistryConfig;
use toolforge_sandbox::SandboxConfig;

pub const DB_ENV: &str = "TOOLFORGE_DB";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub database: DatabaseSection,
    pub sandbox: SandboxConfig,
    pub registry: RegistryConfig,
    pub builtins: BuiltinsSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/toolforge.db"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BuiltinsSection {
    /// JSON catalog seeded by `init`.
    pub catalog: Option<PathBuf>,
}

impl ForgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        if let Ok(db) = std::env::var(DB_ENV) {
            if !db.trim().is_empty() {
                config.database.path = PathBuf::from(db);
            }
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ForgeConfig::parse("").unwrap();
        assert_eq!(config.database.path, PathBuf::from("data/toolforge.db"));
        assert_eq!(config.sandbox.timeout_ms, SandboxConfig::default().timeout_ms);
        assert!(config.registry.auto_mount);
        assert!(config.builtins.catalog.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = ForgeConfig::parse(
            r#"
            [database]
            path = "/tmp/forge.db"

            [sandbox]
            timeout_ms = 5000
            max_loop_iterations = 100000

            [registry]
            auto_mount = false

            [builtins]
            catalog = "config/builtins.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/forge.db"));
        assert_eq!(config.sandbox.timeout_ms, 5000);
        assert_eq!(config.sandbox.max_loop_iterations, Some(100_000));
        assert_eq!(config.sandbox.max_output_bytes, SandboxConfig::default().max_output_bytes);
        assert!(!config.registry.auto_mount);
        assert_eq!(
            config.builtins.catalog,
            Some(PathBuf::from("config/builtins.json"))
        );
    }

    #[test]
    fn shipped_config_caps_handler_loops() {
        let config = ForgeConfig::parse(include_str!("../../../config/toolforge.toml")).unwrap();
        assert!(config.sandbox.max_loop_iterations.is_some());
        assert_eq!(
            config.sandbox.max_loop_iterations,
            SandboxConfig::default().max_loop_iterations
        );
    }

    #[test]
    fn missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForgeConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.registry.auto_mount);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[database\npath = 1").unwrap();
        assert!(ForgeConfig::load(&path).is_err());
    }
}
