//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod adjust;
mod helpers;
mod init;
mod serve;
mod versions;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "recipe-adjust")]
#[command(about = "AI-driven recipe adjustment pipeline with versioned variations")]
#[command(version)]
pub struct Cli {
    /// Data directory or database file (overrides config file).
    /// Can be a directory containing recipe-adjust.db or a .db file directly.
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Start the HTTP API together with the worker pool
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default: from config, 127.0.0.1:8080)
        #[arg(long)]
        bind: Option<String>,
        /// Number of pipeline workers (default: from config)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Run pipeline workers without the HTTP API
    Worker {
        /// Number of pipeline workers (default: from config)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Process what is queued, then exit
        #[arg(long)]
        once: bool,
    },

    /// Submit an adjustment from a JSON file
    Submit {
        /// File containing {"saved_recipe_id", "feedback_id", "snapshot"}
        file: PathBuf,
        /// Process the request in this process and wait for the result
        #[arg(long)]
        wait: bool,
    },

    /// Show the status and history of an adjustment
    Status {
        request_id: String,
    },

    /// Cancel an adjustment
    Cancel {
        request_id: String,
    },

    /// Retry a failed adjustment
    Retry {
        request_id: String,
    },

    /// List the variations of a saved recipe
    Versions {
        saved_recipe_id: String,
    },

    /// Show what a variation changed relative to the original recipe
    Diff {
        saved_recipe_id: String,
        version_id: String,
    },

    /// Make an earlier variation active again
    Rollback {
        saved_recipe_id: String,
        version_id: String,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data: cli.data,
    };
    let (settings, config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings, &config).await,
        Commands::Serve { bind, workers } => {
            serve::cmd_serve(&settings, &config, bind.as_deref(), workers).await
        }
        Commands::Worker { workers, once } => {
            serve::cmd_worker(&settings, &config, workers, once).await
        }
        Commands::Submit { file, wait } => adjust::cmd_submit(&settings, &config, &file, wait).await,
        Commands::Status { request_id } => adjust::cmd_status(&settings, &config, &request_id).await,
        Commands::Cancel { request_id } => adjust::cmd_cancel(&settings, &config, &request_id).await,
        Commands::Retry { request_id } => adjust::cmd_retry(&settings, &config, &request_id).await,
        Commands::Versions { saved_recipe_id } => {
            versions::cmd_versions(&settings, &config, &saved_recipe_id).await
        }
        Commands::Diff {
            saved_recipe_id,
            version_id,
        } => versions::cmd_diff(&settings, &config, &saved_recipe_id, &version_id).await,
        Commands::Rollback {
            saved_recipe_id,
            version_id,
        } => versions::cmd_rollback(&settings, &config, &saved_recipe_id, &version_id).await,
    }
}
