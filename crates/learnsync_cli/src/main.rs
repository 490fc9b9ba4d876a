//! learnsync CLI
//!
//! Command-line tools for the durable sync queue.
//!
//! # Commands
//!
//! - `inspect` - List queued operations
//! - `verify` - Replay the journal and report its health
//! - `drop` - Remove one queued operation
//! - `clear` - Empty the queue

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// learnsync queue maintenance tools.
#[derive(Parser)]
#[command(name = "learnsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue journal file
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
    /// List queued operations in processing order
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Replay the journal and report record counts or corruption
    Verify,

    /// Remove one queued operation
    Drop {
        /// Operation id
        id: String,
    },

    /// Remove every queued operation
    Clear,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Queue path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Queue path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Drop { id } => {
            let path = cli.path.ok_or("Queue path required for drop")?;
            commands::drop::run(&path, &id)?;
        }
        Commands::Clear => {
            let path = cli.path.ok_or("Queue path required for clear")?;
            commands::clear::run(&path)?;
        }
        Commands::Version => {
            println!("learnsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "queue journal format v{}",
                learnsync_engine::queue::JOURNAL_VERSION
            );
        }
    }

    Ok(())
}
