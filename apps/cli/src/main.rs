//! Strata CLI - Command-line interface for the Strata model cache
//!
//! This CLI provides a `strata` command for inspecting cache configuration and
//! replaying scripted workloads against the two-tier model cache.

mod commands;
mod workload;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{config, simulate};

/// Strata CLI - Two-tier model cache toolkit
#[derive(Parser, Debug)]
#[command(
    name = "strata",
    author,
    version,
    about = "Strata - Two-tier model cache",
    long_about = "Strata keeps large model weights in host memory and copies them to the execution device on demand.\nThis tool prints the effective cache configuration and simulates cache workloads."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence when set.
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Config file with a [model_cache] table
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a workload file against a fresh cache
    ///
    /// Loads the models and steps described in the workload, runs them in
    /// order and prints the resulting cache contents and statistics.
    Simulate {
        /// Path to the workload TOML file
        workload: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective cache configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Simulate { workload, json } => simulate::execute(&workload, args.config.as_deref(), json),
        Command::Config { json } => config::execute(args.config.as_deref(), json),
    }
}
