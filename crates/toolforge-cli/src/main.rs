//! CLI entry point for toolforge.
//!
//! Mount state lives in memory, so every command that needs mounted
//! primitives calls `initialize()` on a fresh registry first.

mod cli;
mod config;

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use toolforge_registry::{
    CreatePluginRequest, CreatePrimitiveRequest, ExecutionOptions, ListOptions, PrimitiveExecutor,
    PrimitiveRegistry, UpdatePrimitiveRequest, parse_catalog,
};
use toolforge_sandbox::{Sandbox, validate_handler_security};
use toolforge_store::Database;

use crate::cli::{Cli, Commands, PluginAction};
use crate::config::ForgeConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = ForgeConfig::load(&cli.config)?;

    match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::List {
            mode,
            category,
            tags,
            search,
        } => {
            let registry = open_initialized(&config).await?;
            let options = ListOptions {
                category,
                tags,
                search,
                ..ListOptions::mode(mode.into())
            };
            print_json(&registry.list_primitives(&options).await?)
        }
        Commands::Create {
            name,
            handler_file,
            schema_file,
            description,
            category,
            plugin,
            timeout,
            trusted,
            no_mount,
        } => {
            let registry = open_registry(&config).await?;
            let mut req = CreatePrimitiveRequest::new(name, read_file(&handler_file)?);
            if let Some(path) = schema_file {
                req.input_schema = serde_json::from_str(&read_file(&path)?)
                    .with_context(|| format!("{} is not valid JSON", path.display()))?;
            }
            req.description = description.unwrap_or_default();
            req.category = category;
            req.plugin_id = plugin;
            req.timeout = timeout;
            req.sandbox = !trusted;
            req.auto_mount = Some(!no_mount);
            print_json(&registry.create_primitive(req).await?)
        }
        Commands::Update {
            id,
            handler_file,
            description,
        } => {
            let registry = open_initialized(&config).await?;
            let req = UpdatePrimitiveRequest {
                handler: handler_file.as_deref().map(read_file).transpose()?,
                description,
                ..UpdatePrimitiveRequest::default()
            };
            print_json(&registry.update_primitive(&id, req).await?)
        }
        Commands::Delete { id, force } => {
            let registry = open_initialized(&config).await?;
            registry.delete_primitive(&id, force).await?;
            println!("deleted {id}");
            Ok(())
        }
        Commands::Exec {
            target,
            args,
            debug,
        } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            let executor = PrimitiveExecutor::new(open_initialized(&config).await?);
            let result = executor
                .execute(
                    &target,
                    args,
                    ExecutionOptions {
                        debug,
                        ..ExecutionOptions::default()
                    },
                )
                .await;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::History { id, limit } => {
            let registry = open_registry(&config).await?;
            print_json(&registry.recent_executions(&id, limit).await?)
        }
        Commands::Check { handler_file } => {
            let report = validate_handler_security(&read_file(&handler_file)?);
            print_json(&report)?;
            if !report.safe {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Plugin { action } => cmd_plugin(&config, action).await,
        Commands::Stats => {
            let registry = open_initialized(&config).await?;
            print_json(&registry.get_stats().await?)
        }
    }
}

async fn cmd_init(config: &ForgeConfig) -> Result<()> {
    let registry = open_registry(config).await?;
    info!(path = %config.database.path.display(), "database ready");

    if let Some(path) = &config.builtins.catalog {
        let catalog = parse_catalog(&read_file(path)?)
            .with_context(|| format!("failed to parse catalog {}", path.display()))?;
        let report = registry.seed_builtins(catalog).await;
        print_json(&report)?;
    }

    let report = registry.initialize().await;
    print_json(&report)
}

async fn cmd_plugin(config: &ForgeConfig, action: PluginAction) -> Result<()> {
    let registry = open_initialized(config).await?;
    match action {
        PluginAction::List => print_json(&registry.list_plugins().await?),
        PluginAction::Create {
            name,
            slug,
            description,
        } => {
            let req = CreatePluginRequest {
                slug,
                description,
                ..CreatePluginRequest::new(name)
            };
            print_json(&registry.create_plugin(req).await?)
        }
        PluginAction::Enable { id } => print_json(&registry.set_plugin_enabled(&id, true).await?),
        PluginAction::Disable { id } => {
            print_json(&registry.set_plugin_enabled(&id, false).await?)
        }
        PluginAction::Delete { id } => print_json(&registry.delete_plugin(&id).await?),
    }
}

// ── helpers ──────────────────────────────────────────────────────────

async fn open_registry(config: &ForgeConfig) -> Result<PrimitiveRegistry> {
    let path = config.database.path.clone();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open_and_migrate(path)
        .await
        .context("failed to open database")?;
    Ok(PrimitiveRegistry::new(
        db,
        Sandbox::new(config.sandbox.clone()),
        config.registry.clone(),
    ))
}

async fn open_initialized(config: &ForgeConfig) -> Result<PrimitiveRegistry> {
    let registry = open_registry(config).await?;
    let report = registry.initialize().await;
    for err in &report.errors {
        tracing::warn!(%err, "primitive not mounted");
    }
    Ok(registry)
}

fn read_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(content)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
