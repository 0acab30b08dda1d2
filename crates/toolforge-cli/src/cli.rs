//! CLI argument definitions for toolforge.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use toolforge_registry::ListMode;

/// toolforge -- define, mount and run sandboxed primitives.
#[derive(Parser)]
#[command(
    name = "toolforge",
    version,
    about = "toolforge -- dynamic primitive engine",
    long_about = "Store small ECMAScript handlers as primitives, mount them into a \
                  sandbox and execute them with schema-checked arguments."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/toolforge.toml")]
    pub config: PathBuf,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and seed the built-in catalog.
    Init,

    /// List primitives.
    List {
        #[arg(long, value_enum, default_value_t = ModeArg::All)]
        mode: ModeArg,
        #[arg(long)]
        category: Option<String>,
        /// Match primitives carrying any of these tags.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Case-insensitive substring of name or description.
        #[arg(long)]
        search: Option<String>,
    },

    /// Create a primitive from a handler file.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        handler_file: PathBuf,
        /// JSON file holding the input schema.
        #[arg(long)]
        schema_file: Option<PathBuf>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Owning plugin id.
        #[arg(long)]
        plugin: Option<String>,
        /// Timeout in milliseconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Run with the full standard library instead of the isolated set.
        #[arg(long)]
        trusted: bool,
        /// Store without mounting.
        #[arg(long)]
        no_mount: bool,
    },

    /// Update a primitive's handler or description.
    Update {
        id: String,
        #[arg(long)]
        handler_file: Option<PathBuf>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a primitive.
    Delete {
        id: String,
        /// Dismount first if mounted.
        #[arg(long)]
        force: bool,
    },

    /// Execute a primitive by id or name.
    Exec {
        target: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Set `context.debug` for the handler.
        #[arg(long)]
        debug: bool,
    },

    /// Show the latest logged executions of a primitive.
    History {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Run the security gate over a handler file.
    Check { handler_file: PathBuf },

    /// Manage plugins.
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Show registry counters.
    Stats,
}

#[derive(Subcommand)]
pub enum PluginAction {
    /// List all plugins.
    List,
    /// Create a disabled plugin.
    Create {
        name: String,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Enable a plugin and mount its primitives.
    Enable { id: String },
    /// Disable a plugin and dismount its primitives.
    Disable { id: String },
    /// Delete a plugin and every primitive it owns.
    Delete { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Mounted,
    Available,
    All,
}

impl From<ModeArg> for ListMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Mounted => ListMode::Mounted,
            ModeArg::Available => ListMode::Available,
            ModeArg::All => ListMode::All,
        }
    }
}
