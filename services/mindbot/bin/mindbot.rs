//! Main Entrypoint for the MindBot Worker
//!
//! This binary is responsible for:
//! 1. Parsing the invocation mode (`console`, `dev` or `start`).
//! 2. Loading configuration from the environment.
//! 3. Initializing logging.
//! 4. Prewarming process resources.
//! 5. Running a console session or serving WebSocket jobs.

use anyhow::Context;
use clap::Parser;
use mindbot_core::vad::VadOptions;
use mindbot_worker::{
    cli::{Cli, Mode},
    config::AgentConfig,
    entrypoint::ProviderAdapters,
    logging::setup_logging,
    worker::Worker,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = AgentConfig::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    setup_logging(cli.mode.log_level(config.log_level));
    info!(mode = ?cli.mode, "Configuration loaded.");
    if !config.validate() {
        warn!(
            missing = ?config.missing_credentials(),
            "Credentials are missing; sessions will fail to start"
        );
    }

    // --- 3. Prewarm ---
    let bind_address = cli.mode.bind_address(config.bind_address);
    let worker = Arc::new(
        Worker::new(config, Arc::new(ProviderAdapters), VadOptions::default())
            .context("Failed to prewarm worker")?,
    );

    // --- 4. Run ---
    match cli.mode {
        Mode::Console => worker.run_console().await,
        Mode::Dev { .. } | Mode::Start { .. } => worker.serve(bind_address).await,
    }
}
