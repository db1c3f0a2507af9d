//! Syncore CLI
//!
//! Read-only tools for looking at a sync store on disk.
//!
//! # Commands
//!
//! - `inspect` - Summarize the persisted sync snapshot
//! - `cache` - Decode and print a cached entity blob

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use syncore_engine::DEFAULT_STATE_KEY;
use tracing_subscriber::EnvFilter;

/// Syncore sync store tools.
#[derive(Parser)]
#[command(name = "syncore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the persisted sync snapshot
    Inspect {
        /// Storage key of the snapshot
        #[arg(short, long, default_value = DEFAULT_STATE_KEY)]
        key: String,

        /// List every queued item
        #[arg(short, long)]
        items: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode and print a cached entity blob
    Cache {
        /// Entity name, without the `offline_` prefix
        entity: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { key, items, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &key, items, &format)?;
        }
        Commands::Cache { entity } => {
            let path = cli.path.ok_or("Store path required for cache")?;
            commands::cache::run(&path, &entity)?;
        }
        Commands::Version => {
            println!("Syncore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
