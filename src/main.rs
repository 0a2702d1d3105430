//! Binary entry point for dupstack.
//!
//! This binary provides the CLI interface for the dupstack dedup engine.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use dupstack::cli::{
    CompareCommand, ConfigCommand, ImportCommand, InstallCommand, ResolveCommand, RunCommand,
    StacksCommand, StatusCommand, parse_item_type,
};
use dupstack::config::DupstackConfig;
use dupstack::io::Format;
use dupstack::observability::{self, ObservabilityConfig};
use dupstack::storage::SqliteDedupStore;
use dupstack::{ItemType, WorkspaceId};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Dupstack - duplicate detection and dup-stack clustering for CRM records.
#[derive(Parser)]
#[command(name = "dupstack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "DUPSTACK_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Directory holding the database (overrides config and environment).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Sync a JSON/NDJSON or CSV export into a workspace.
    Import {
        /// File to import.
        file: PathBuf,

        /// Target workspace.
        #[arg(short, long)]
        workspace: String,

        /// Item type of the records: contacts or companies.
        #[arg(short = 't', long, value_parser = parse_item_type)]
        item_type: ItemType,

        /// File format: json or csv (default: from extension).
        #[arg(short, long)]
        format: Option<Format>,
    },

    /// Compute similarity edges for pending items.
    Install {
        /// Target workspace.
        #[arg(short, long)]
        workspace: String,

        /// Restrict to one item type.
        #[arg(short = 't', long, value_parser = parse_item_type)]
        item_type: Option<ItemType>,

        /// Items per comparison batch.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Build dup stacks from installed similarity edges.
    Resolve {
        /// Target workspace.
        #[arg(short, long)]
        workspace: String,

        /// Stop after this many passes.
        #[arg(long)]
        max_passes: Option<u64>,
    },

    /// Install then resolve one or more workspaces.
    Run {
        /// Workspaces to run (default: every stored workspace).
        #[arg(short, long)]
        workspace: Vec<String>,
    },

    /// Show progress and counts.
    Status {
        /// Workspace to show (default: all).
        #[arg(short, long)]
        workspace: Option<String>,

        /// Print JSON.
        #[arg(long)]
        json: bool,
    },

    /// List dup stacks.
    Stacks {
        /// Workspace to list.
        #[arg(short, long)]
        workspace: String,

        /// Restrict to one item type.
        #[arg(short = 't', long, value_parser = parse_item_type)]
        item_type: Option<ItemType>,

        /// Print JSON.
        #[arg(long)]
        json: bool,
    },

    /// Score two items against each other and explain the verdict.
    Compare {
        /// External id of the first item.
        first: String,

        /// External id of the second item.
        second: String,

        /// Workspace holding both items.
        #[arg(short, long)]
        workspace: String,

        /// Item type of both items.
        #[arg(short = 't', long, value_parser = parse_item_type, default_value = "contacts")]
        item_type: ItemType,

        /// Print JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration.
    Config {
        /// Print only the database path.
        #[arg(long)]
        database_path: bool,
    },
}

/// Main entry point.
fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(ObservabilityConfig::from_config(&config, cli.verbose)) {
        eprintln!("Failed to initialize observability: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration and applies the `--data-dir` override.
fn load_config(cli: &Cli) -> anyhow::Result<DupstackConfig> {
    let mut config = DupstackConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config = config.with_data_dir(data_dir.clone());
    }
    Ok(config)
}

/// Opens the workspace database, creating it on first use.
fn open_store(config: &DupstackConfig) -> anyhow::Result<Arc<SqliteDedupStore>> {
    let path = config.database_path();
    let store = SqliteDedupStore::new(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Runs the selected command.
fn run_command(command: Commands, config: &DupstackConfig) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Import {
            file,
            workspace,
            item_type,
            format,
        } => ImportCommand {
            file,
            workspace: WorkspaceId::new(workspace),
            item_type,
            format,
        }
        .execute(&open_store(config)?, config, &mut out)?,

        Commands::Install {
            workspace,
            item_type,
            batch_size,
        } => InstallCommand {
            workspace: WorkspaceId::new(workspace),
            item_type,
            batch_size,
        }
        .execute(&open_store(config)?, config, &mut out)?,

        Commands::Resolve {
            workspace,
            max_passes,
        } => ResolveCommand {
            workspace: WorkspaceId::new(workspace),
            max_passes,
        }
        .execute(&open_store(config)?, config, &mut out)?,

        Commands::Run { workspace } => RunCommand {
            workspaces: workspace.into_iter().map(WorkspaceId::new).collect(),
        }
        .execute(&open_store(config)?, config, &mut out)?,

        Commands::Status { workspace, json } => StatusCommand {
            workspace: workspace.map(WorkspaceId::new),
            json,
        }
        .execute(open_store(config)?.as_ref(), &mut out)?,

        Commands::Stacks {
            workspace,
            item_type,
            json,
        } => StacksCommand {
            workspace: WorkspaceId::new(workspace),
            item_type,
            json,
        }
        .execute(open_store(config)?.as_ref(), &mut out)?,

        Commands::Compare {
            first,
            second,
            workspace,
            item_type,
            json,
        } => CompareCommand {
            workspace: WorkspaceId::new(workspace),
            item_type,
            first,
            second,
            json,
        }
        .execute(open_store(config)?.as_ref(), config, &mut out)?,

        Commands::Config { database_path } => {
            ConfigCommand { database_path }.execute(config, &mut out)?;
        },
    }

    out.flush()?;
    Ok(())
}
