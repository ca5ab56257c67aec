//! # Main — CLI Entry Point
//!
//! Routes subcommands to either the HTTP dashboard or a single pipeline
//! stage run directly against a working directory. Stage subcommands call
//! the same `pipeline::run_*` functions the dashboard's HTTP handlers do
//! (see `cli.rs`), so scripting a stage from a shell doesn't duplicate the
//! logic the server uses.
//!
//! ## Subcommands
//!
//! - `serve`: starts the Axum dashboard on `--port` (env `PORT`).
//! - `clean <input>`: runs the Clean stage against a JSON file.
//! - `duration`, `sequence`: run the next stage against the working
//!   directory's prior artifact.
//! - `critical [--extras <file>]`: runs the Critical stage, optionally
//!   merging extra activities from a JSON file.
//!
//! ## Global Options
//!
//! - `--data-dir` / `CADSCHED_DATA_DIR`: shared working directory for
//!   `*_latest.json` artifacts and the `archive/` directory.

mod cli;

use anyhow::Result;
use cadsched::dashboard;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cadsched", about = "Derive a construction schedule from 3D CAD extracts")]
struct Cli {
    /// Shared working directory for stage artifacts and archives.
    #[arg(long, env = "CADSCHED_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP dashboard (exposes /v1/clean, /v1/duration, /v1/sequence, /v1/critical)
    Serve {
        /// Port to listen on.
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Run the Clean stage against a JSON file of raw CAD records
    Clean {
        /// Path to a JSON file: an array of records, or {activities|data, dependencies?}
        input: PathBuf,
    },
    /// Run the Duration stage against the working directory's clean output
    Duration,
    /// Run the Sequence stage against the working directory's duration output
    Sequence,
    /// Run the Critical stage against the working directory's sequence output
    Critical {
        /// Optional JSON file of extra activities to merge before the CPM pass
        #[arg(long)]
        extras: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging: LOG_FORMAT=json for K8s, human-readable otherwise
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(dashboard::run(*port, cli.data_dir.clone()))
        }
        Commands::Clean { input } => cli::run_clean(&cli.data_dir, input),
        Commands::Duration => cli::run_duration(&cli.data_dir),
        Commands::Sequence => cli::run_sequence(&cli.data_dir),
        Commands::Critical { extras } => cli::run_critical(&cli.data_dir, extras.clone()),
    }
}
