//! pbftscope command-line driver.
//!
//! Runs the PBFT simulator headlessly, records its checkpoint history, and
//! replays recordings at any point in simulated time.
//!
//! # Quick Start
//!
//! ```bash
//! # Run the demonstration scenario for one simulated second
//! pbftscope run
//!
//! # Stop the primary once the first request is in flight, keep a recording
//! pbftscope run --stop 1 --record faulty.json
//!
//! # Inspect the recording at 250ms
//! pbftscope replay faulty.json --at 250000
//! ```

mod commands;
mod report;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// pbftscope - a PBFT simulator with time travel.
#[derive(Parser)]
#[command(name = "pbftscope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory to load pbftscope.toml from.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project: PathBuf,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a simulation forward and report the final cluster state.
    Run {
        /// Simulated microseconds to run (overrides run.duration).
        #[arg(short, long)]
        duration: Option<u64>,

        /// Simulated microseconds per step (overrides run.tick).
        #[arg(short, long)]
        tick: Option<u64>,

        /// Seed for latency and jitter (overrides protocol.seed).
        #[arg(short, long)]
        seed: Option<u64>,

        /// Number of replicas (overrides protocol.replicas).
        #[arg(short = 'n', long)]
        replicas: Option<usize>,

        /// Start from a bare cluster instead of the demonstration scenario.
        #[arg(long)]
        no_scenario: bool,

        /// Stop these replicas at --fault-at.
        #[arg(long, value_name = "REPLICA")]
        stop: Vec<u8>,

        /// Drop every commit this replica sends from --fault-at onward.
        #[arg(long, value_name = "REPLICA")]
        drop_commits_from: Option<u8>,

        /// Simulated microsecond at which faults are injected.
        #[arg(long, default_value_t = pbftscope_sim::SCENARIO_REQUEST_DELAY)]
        fault_at: u64,

        /// Write the checkpoint history here (.json or .bin).
        #[arg(short, long)]
        record: Option<PathBuf>,

        /// Print a JSON report instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Load a recording and report the cluster at a point in time.
    Replay {
        /// Recording written by `run --record`.
        recording: PathBuf,

        /// Simulated microsecond to seek to (default: end of the recording).
        #[arg(short, long)]
        at: Option<u64>,

        /// Print a JSON report instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration.
    Config {
        /// Output format (toml, json).
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    style::init(cli.no_color);

    match cli.command {
        Commands::Run {
            duration,
            tick,
            seed,
            replicas,
            no_scenario,
            stop,
            drop_commits_from,
            fault_at,
            record,
            json,
        } => commands::run::run(
            &cli.project,
            &commands::run::RunArgs {
                duration,
                tick,
                seed,
                replicas,
                no_scenario,
                stop,
                drop_commits_from,
                fault_at,
                record,
                json,
            },
        ),
        Commands::Replay {
            recording,
            at,
            json,
        } => commands::replay::run(&cli.project, &recording, at, json),
        Commands::Config { format } => commands::config::show(&cli.project, &format),
    }
}
