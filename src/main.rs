//! Driftwatch agent CLI
//!
//! Probe configured SQL sources, compare against a learned baseline, and
//! dispatch signed webhooks on health-state transitions.
//!
//! Environment variables:
//! - RUST_LOG: log filter, overrides the configured level
//! - Anything referenced from the config file via ${VAR}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use driftwatch::cli;

#[derive(Parser)]
#[command(name = "driftwatch")]
#[command(about = "Data-quality monitoring agent")]
#[command(version)]
struct Cli {
    /// Config file path (default: ./driftwatch.yaml, then standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe sources now and alert on state transitions
    Check {
        /// Only check this source
        #[arg(long)]
        source: Option<String>,

        /// Probe even if the interval has not elapsed
        #[arg(long)]
        force: bool,

        /// Compute decisions and payloads without sending or storing alert state
        #[arg(long)]
        dry_run: bool,

        /// Emit JSON instead of human-readable output
        #[arg(long)]
        json: bool,
    },

    /// Run the agent in the foreground, probing on each source's interval
    Daemon {
        /// Serve GET /healthz on this port
        #[arg(long)]
        health_port: Option<u16>,
    },

    /// Show the last known state of every source
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Show snapshot history for one source
    History {
        source: String,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show the learned baseline and thresholds for one source
    Explain {
        source: String,

        #[arg(long)]
        json: bool,
    },

    /// Send a test payload to webhook targets
    TestWebhook {
        /// Only this target
        #[arg(long)]
        target: Option<String>,
    },

    /// Delete snapshots past the retention window
    Purge {
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply ledger schema migrations
    Migrate,

    /// Write an example config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    match run(args).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Cli) -> anyhow::Result<i32> {
    let config = args.config.as_deref();
    let verbose = args.verbose;

    match args.command {
        Commands::Check {
            source,
            force,
            dry_run,
            json,
        } => cli::check(config, source.as_deref(), force, dry_run, json, verbose).await,
        Commands::Daemon { health_port } => cli::daemon(config, health_port, verbose).await,
        Commands::Status { json } => cli::status(config, json, verbose),
        Commands::History {
            source,
            limit,
            json,
        } => cli::history(config, &source, limit, json, verbose),
        Commands::Explain { source, json } => cli::explain(config, &source, json, verbose),
        Commands::TestWebhook { target } => {
            cli::test_webhook(config, target.as_deref(), verbose).await
        }
        Commands::Purge { dry_run } => cli::purge(config, dry_run, verbose),
        Commands::Migrate => cli::migrate(config, verbose),
        Commands::Init { force } => cli::init(config, force),
    }
}
