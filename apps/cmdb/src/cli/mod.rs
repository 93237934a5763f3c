//! # CMDB CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create the database and seed the built-in schema
//! - `chain` - Show the mainline chain
//! - `level insert|remove` - Splice custom mainline levels in and out
//! - `biz create|archive|revive|delete` - Business lifecycle
//! - `inst create|update|delete|list` - Generic instance CRUD
//! - `host assign|unassign` - Host placement in modules
//! - `asst create|delete|related` - Instance associations
//! - `model-asst create|delete` - Model associations
//! - `topo` - Mainline tree below an instance

mod commands;

use crate::config::AppConfig;
use clap::{Parser, Subcommand, ValueEnum};
use cmdb_core::CmdbError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// CMDB mainline topology administration.
///
/// Every command opens the database, seeds the built-in schema if it is
/// missing and runs one engine operation.
#[derive(Parser, Debug)]
#[command(name = "cmdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress human-readable summaries
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database
    #[arg(short = 'D', long, global = true, default_value = "cmdb.redb")]
    pub database: PathBuf,

    /// Storage backend
    #[arg(short = 'B', long, global = true, value_enum, default_value_t = Backend::Redb)]
    pub backend: Backend,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Append audit entries to this JSON-lines file
    #[arg(long, global = true)]
    pub audit_log: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where the instance store lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// redb database file (persistent)
    Redb,
    /// In-memory tables, discarded on exit
    Memory,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new database
    Init {
        /// Remove an existing database first
        #[arg(short, long)]
        force: bool,
    },

    /// Show the mainline chain with each object's neighbours
    Chain,

    /// Custom mainline levels
    #[command(subcommand)]
    Level(LevelCommand),

    /// Business lifecycle
    #[command(subcommand)]
    Biz(BizCommand),

    /// Generic instance operations
    #[command(subcommand)]
    Inst(InstCommand),

    /// Host placement
    #[command(subcommand)]
    Host(HostCommand),

    /// Instance associations
    #[command(subcommand)]
    Asst(AsstCommand),

    /// Model associations
    #[command(subcommand)]
    ModelAsst(ModelAsstCommand),

    /// Show the mainline tree below an instance
    Topo {
        /// Object of the root instance
        #[arg(short, long, default_value = "biz")]
        obj: String,

        /// Root instance id
        #[arg(short, long)]
        id: i64,

        /// Include host, service instance and host apply rule counts
        #[arg(short = 's', long)]
        with_statistics: bool,

        /// Include the idle set under a business root
        #[arg(long)]
        with_default: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum LevelCommand {
    /// Insert a level directly below a mainline object
    Insert {
        /// Object id of the new level
        obj_id: String,

        /// Display name of the new level
        #[arg(short, long)]
        name: String,

        /// Mainline object the level goes under
        #[arg(short, long)]
        parent: String,

        #[arg(long, default_value = "bk_biz_topo")]
        classification: String,

        #[arg(long, default_value = "icon-cc-default")]
        icon: String,
    },

    /// Remove a custom level, moving its children up
    Remove {
        /// Object id of the level
        obj_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum BizCommand {
    /// Create a business with its idle pool
    Create {
        /// Business name
        name: String,

        /// Extra fields as a JSON object
        #[arg(long)]
        data: Option<String>,
    },

    /// Disable a business so it can be deleted
    Archive { id: i64 },

    /// Re-enable an archived business
    Revive { id: i64 },

    /// Tear down archived businesses
    Delete {
        /// Business ids (comma-separated)
        #[arg(value_delimiter = ',', required = true)]
        ids: Vec<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum InstCommand {
    /// Create an instance from a JSON object
    Create {
        /// Object id
        obj: String,

        /// Instance fields as a JSON object
        #[arg(short, long)]
        data: String,
    },

    /// Patch one instance with a JSON object
    Update {
        obj: String,
        id: i64,

        #[arg(short, long)]
        data: String,
    },

    /// Delete instances and their mainline subtrees
    Delete {
        obj: String,

        /// Instance ids (comma-separated)
        #[arg(value_delimiter = ',', required = true)]
        ids: Vec<i64>,
    },

    /// List instances of an object
    List {
        obj: String,

        /// Only instances under this parent
        #[arg(long)]
        parent: Option<i64>,

        /// Only instances of this business
        #[arg(long)]
        biz: Option<i64>,

        #[arg(long, default_value = "0")]
        start: usize,

        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum HostCommand {
    /// Place a host into a module
    Assign {
        #[arg(long)]
        host: i64,
        #[arg(long)]
        module: i64,
    },

    /// Take a host out of a module
    Unassign {
        #[arg(long)]
        host: i64,
        #[arg(long)]
        module: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum AsstCommand {
    /// Link two instances under a model association
    Create {
        /// Model association id, e.g. host_connect_switch
        obj_asst_id: String,

        /// Source instance id
        #[arg(long)]
        src: i64,

        /// Destination instance id
        #[arg(long)]
        dst: i64,
    },

    /// Remove one instance association by row id
    Delete { id: i64 },

    /// Show instances linked to one instance, both directions
    Related { obj: String, id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum ModelAsstCommand {
    /// Create a model association
    Create {
        /// Source object
        obj: String,

        /// Destination object
        asst_obj: String,

        /// Association kind, e.g. connect
        #[arg(short, long)]
        kind: String,

        /// Cardinality: 1:1, 1:n or n:n
        #[arg(short, long, default_value = "n:n")]
        mapping: String,

        /// none, delete_src or delete_dest
        #[arg(long, default_value = "none")]
        on_delete: String,
    },

    /// Delete a model association by row id
    Delete { id: i64 },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub database: PathBuf,
    pub backend: Backend,
    pub json_mode: bool,
    pub quiet: bool,
    pub audit_log: Option<PathBuf>,
    pub config: AppConfig,
}

impl Context {
    /// Resolve the configuration file and command line overrides.
    pub fn from_cli(cli: &Cli) -> Result<Self, CmdbError> {
        let config = AppConfig::load(cli.config.as_deref())?;
        let audit_log = cli.audit_log.clone().or_else(|| config.audit_log.clone());
        Ok(Self {
            database: cli.database.clone(),
            backend: cli.backend,
            json_mode: cli.json_mode,
            quiet: cli.quiet,
            audit_log,
            config,
        })
    }
}

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), CmdbError> {
    let ctx = Context::from_cli(&cli)?;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&ctx, force),
        Some(Commands::Chain) | None => cmd_chain(&ctx),
        Some(Commands::Level(command)) => cmd_level(&ctx, command),
        Some(Commands::Biz(command)) => cmd_biz(&ctx, command),
        Some(Commands::Inst(command)) => cmd_inst(&ctx, command),
        Some(Commands::Host(command)) => cmd_host(&ctx, command),
        Some(Commands::Asst(command)) => cmd_asst(&ctx, command),
        Some(Commands::ModelAsst(command)) => cmd_model_asst(&ctx, command),
        Some(Commands::Topo {
            obj,
            id,
            with_statistics,
            with_default,
        }) => cmd_topo(&ctx, &obj, id, with_statistics, with_default),
    }
}
