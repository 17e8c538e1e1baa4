//! Observer Service
//!
//! Off-chain signer of the cross-chain protocol. Polls the crosschain node for
//! pending outbounds, signs them with the threshold key, broadcasts them and
//! reports the broadcast hashes back to the ledger.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: The `local` keysign backend holds a complete secp256k1 key in
//! the process. It exists for development networks only.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use observer::api::{ApiContext, ApiServer};
use observer::{Config, HttpCoreBridge, LocalKeysigner, Metrics, Supervisor, TssSigner};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Builds the ledger bridge, keysign backend and TSS signer
/// 4. Runs the chain workers and the API until Ctrl-C
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Observer Service");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Observer Service");
        println!();
        println!("Usage: observer [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  OBSERVER_CONFIG_PATH    Path to config file (overrides --config)");
        return Ok(());
    }

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            if std::env::var("OBSERVER_CONFIG_PATH").is_err() {
                std::env::set_var("OBSERVER_CONFIG_PATH", &args[i + 1]);
                info!("Using custom config: {}", args[i + 1]);
            }
            i += 1;
        }
        i += 1;
    }

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let bridge = Arc::new(HttpCoreBridge::new(&config.ledger.url, &config.ledger.operator)?);
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let local_key = config
        .tss
        .local_key()?
        .context("No keysign backend configured: set tss.local_key_env for the local backend")?;
    let keysigner = Arc::new(LocalKeysigner::from_hex(&local_key)?);
    let current_pubkey = if config.tss.current_pubkey.is_empty() {
        keysigner.pubkey().to_string()
    } else {
        config.tss.current_pubkey.clone()
    };

    let mut tss = TssSigner::new(
        keysigner,
        bridge.clone(),
        metrics.clone(),
        &current_pubkey,
        Duration::from_millis(config.tss.round_timeout_ms),
    )?;
    match tss.load_keyshares(Path::new(&config.tss.keyshare_dir)) {
        Ok(n) => info!("Loaded {} keyshare(s) from {}", n, config.tss.keyshare_dir),
        Err(e) => error!("Failed to read keyshare directory {}: {}", config.tss.keyshare_dir, e),
    }
    metrics.register_blame_counters(tss.keys().keys());
    let tss = Arc::new(tss);

    let supervisor = Arc::new(Supervisor::new(&config, bridge.clone(), tss.clone(), metrics.clone())?);
    let api = ApiServer::new(
        config.api.clone(),
        ApiContext {
            operator: config.ledger.operator.clone(),
            tss,
            metrics,
            manager: supervisor.manager(),
            chains: supervisor.chains(),
        },
    );

    let workers = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    tokio::select! {
        result = api.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
    }

    supervisor.shutdown();
    workers.await.context("Supervisor task failed")??;
    info!("Observer stopped");
    Ok(())
}
