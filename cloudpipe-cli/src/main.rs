// cloudpipe-cli/src/main.rs
// ============================================================================
// Module: Cloudpipe CLI Entry Point
// Description: Command dispatcher for the Cloudpipe broker deployments.
// Purpose: Run a broker wired to one of the deployment adapters.
// Dependencies: clap, cloudpipe-broker, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! The `cloudpipe` binary starts a broker over one of four deployment
//! adapters: the `consumer` and `provider` demo topologies, the `heroku`
//! platform adapter, and the `local` on-disk adapter. Each adapter builds a
//! resource registry and hands it to the broker server.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod config_vars;
mod consumer;
mod env_file;
mod heroku;
mod local;
mod provider;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use cloudpipe_broker::ServerError;
use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "cloudpipe", about = "Cloudpipe service binding broker", version)]
struct Cli {
    /// Selected deployment adapter.
    #[command(subcommand)]
    command: Commands,
}

/// Supported deployment adapters.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Consumer demo broker on port 8000.
    Consumer,
    /// Provider demo broker on port 8001.
    Provider,
    /// Heroku platform broker on port 8002.
    Heroku(heroku::HerokuCommand),
    /// Local on-disk broker on port 8003.
    Local(local::LocalCommand),
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors surfaced by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Broker server failure.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// Deployment adapter failure.
    #[error("{0}")]
    Adapter(String),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Consumer => consumer::run().await,
        Commands::Provider => provider::run().await,
        Commands::Heroku(command) => heroku::run(command).await,
        Commands::Local(command) => local::run(command).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the log subscriber; `RUST_LOG` overrides the `info` default.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
