//! Crosschain Node
//!
//! Runs the crosschain state machine behind a single-writer block loop and
//! serves its REST API.
//!
//! ## Overview
//!
//! The node:
//! 1. Loads configuration and builds the genesis state
//! 2. Starts the block loop that orders submitted messages
//! 3. Serves queries and message submission over HTTP
//! 4. Stops the block loop on Ctrl-C

use anyhow::Result;
use std::time::Duration;
use tracing::{error, info};

use crosschain::{api, Config, Node};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Crosschain Node");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Crosschain Node");
        println!();
        println!("Usage: crosschain-node [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  CROSSCHAIN_CONFIG_PATH    Path to config file (overrides --config)");
        return Ok(());
    }

    let mut config_path = None;
    for (i, arg) in args.iter().enumerate() {
        if arg == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            break;
        }
    }
    if std::env::var("CROSSCHAIN_CONFIG_PATH").is_err() {
        if let Some(path) = config_path {
            std::env::set_var("CROSSCHAIN_CONFIG_PATH", &path);
            info!("Using custom config: {}", path);
        }
    }

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let keeper = config.genesis.build_keeper();
    info!(
        "Genesis loaded: {} chains, {} observers",
        keeper.store().supported_chains().len(),
        keeper.store().observers().len()
    );

    let (node, handle) = Node::new(
        keeper,
        Duration::from_millis(config.node.block_time_ms),
        config.node.queue_capacity,
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let block_loop = tokio::spawn(node.run(shutdown_rx));

    let api_server = api::ApiServer::new(config.clone(), handle);

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                error!("API server error: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    let _ = shutdown_tx.send(true);
    match block_loop.await {
        Ok(Err(e)) => error!("Block loop error: {:#}", e),
        Err(e) => error!("Block loop task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}
