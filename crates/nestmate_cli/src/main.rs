//! NestMate Sync CLI
//!
//! Command-line tools for exercising the NestMate sync core.
//!
//! # Commands
//!
//! - `run` - Run a sync session over a JSON scenario
//! - `encode` - Write a CBOR change-log snapshot from JSON change records
//! - `decode` - Print the records of a change-log snapshot

mod commands;

use clap::{Parser, Subcommand};
use nestmate_sync_protocol::ConflictPolicy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// NestMate sync command-line tools.
#[derive(Parser)]
#[command(name = "nestmate-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync session over a JSON scenario
    Run {
        /// Scenario file
        scenario: PathBuf,

        /// Conflict policy (overrides the scenario's)
        #[arg(short, long)]
        policy: Option<ConflictPolicy>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a CBOR change-log snapshot from JSON change records
    Encode {
        /// JSON file holding an array of changes
        changes: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the records of a change-log snapshot
    Decode {
        /// Snapshot file
        input: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            policy,
            format,
        } => {
            commands::run::run(&scenario, policy, &format)?;
        }
        Commands::Encode { changes, output } => {
            commands::encode::run(&changes, &output)?;
        }
        Commands::Decode { input, format } => {
            commands::decode::run(&input, &format)?;
        }
        Commands::Version => {
            println!("NestMate Sync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
