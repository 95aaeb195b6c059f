//! Greenroom CLI — Command-line harness for pre-flight checks.
//!
//! Usage:
//!   greenroom check [OPTIONS]      Run the full pre-flight check
//!   greenroom devices [OPTIONS]    List the devices a scenario exposes
//!   greenroom probe [OPTIONS]      Run only the reachability probe

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "greenroom",
    about = "Pre-flight checks for camera, microphone, and network",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pre-flight check
    Check {
        /// Scenario file for the simulated backend; defaults to a healthy rig
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Print the final report as JSON instead of the live transcript
        #[arg(long)]
        json: bool,

        /// Run the audio-only fallback instead of the full ladder
        #[arg(long)]
        audio_only: bool,

        /// Override the reachability endpoint (host:port)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// List the devices a scenario exposes
    Devices {
        /// Scenario file for the simulated backend; defaults to a healthy rig
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Acquire once first so device labels are unlocked
        #[arg(long)]
        grant: bool,
    },

    /// Run only the reachability probe
    Probe {
        /// Endpoint to probe (host:port)
        #[arg(long)]
        endpoint: Option<String>,

        /// Persist the probed endpoint as the configured default
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    greenroom_common::logging::init_logging(&greenroom_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: false,
        file: None,
    });

    match cli.command {
        Commands::Check {
            scenario,
            json,
            audio_only,
            endpoint,
        } => commands::check::run(scenario, json, audio_only, endpoint).await,
        Commands::Devices { scenario, grant } => commands::devices::run(scenario, grant).await,
        Commands::Probe { endpoint, save } => commands::probe::run(endpoint, save).await,
    }
}
