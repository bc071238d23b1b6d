//! Binary entry point for tierqueue.
//!
//! Administrative CLI over the persistent queue store.

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

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tierqueue::config::TierQueueConfig;
use tierqueue::observability;
use tierqueue::storage::QueueFactory;

/// Tierqueue - inspect and maintain broker message queues.
#[derive(Parser)]
#[command(name = "tierqueue")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "TIERQUEUE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List queues with their entry counts.
    Queues,

    /// Show the counters of a queue.
    Stats {
        /// Storage id, e.g. `callback:client/joe/1`.
        storage_id: String,
    },

    /// Show the first entries of a queue.
    Peek {
        /// Storage id.
        storage_id: String,

        /// Maximum number of entries (-1 for all).
        #[arg(short, long, default_value = "10", allow_hyphen_values = true)]
        num: i64,

        /// Maximum number of bytes (-1 for unbounded).
        #[arg(short, long, default_value = "-1", allow_hyphen_values = true)]
        bytes: i64,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Remove all transient entries of a queue.
    PurgeTransient {
        /// Storage id.
        storage_id: String,
    },

    /// Remove all entries of a queue.
    Clear {
        /// Storage id.
        storage_id: String,
    },

    /// Check that the database is reachable.
    Ping,
}

/// Main entry point.
fn main() -> ExitCode {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_from_config(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli, mut config: TierQueueConfig) -> anyhow::Result<()> {
    if let Some(db) = cli.db {
        config = config.with_database_path(db);
    }
    let factory = QueueFactory::from_config(&config).context("failed to open queue store")?;

    match cli.command {
        Commands::Queues => commands::cmd_queues(&factory),
        Commands::Stats { storage_id } => commands::cmd_stats(&factory, &storage_id),
        Commands::Peek {
            storage_id,
            num,
            bytes,
            json,
        } => commands::cmd_peek(&factory, &storage_id, num, bytes, json),
        Commands::PurgeTransient { storage_id } => {
            commands::cmd_purge_transient(&factory, &storage_id)
        },
        Commands::Clear { storage_id } => commands::cmd_clear(&factory, &storage_id),
        Commands::Ping => commands::cmd_ping(&factory),
    }
}

/// Loads configuration: an explicit file, else the default location, then
/// environment overrides.
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<TierQueueConfig> {
    let config = match path {
        Some(path) => TierQueueConfig::load_from_file(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => TierQueueConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}
