//! Observer Supervisor Module
//!
//! Runs one worker task per configured chain. Each worker polls the ledger for
//! the chain's pending outbounds and hands every outbound that is not already
//! in flight to the chain's signer. Outcomes flow back to the supervisor on an
//! mpsc channel and are counted in the metrics.
//!
//! Shutdown is cooperative: the watch signal stops new polls, then every
//! worker waits for its in-flight signing tasks before exiting.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crosschain::types::{Chain, ChainKind};

use crate::bridge::CoreBridge;
use crate::config::{ChainConfig, Config};
use crate::metrics::Metrics;
use crate::outbound::{
    out_tx_id, BitcoinRpcClient, ChainSigner, OutTxProcessorManager, OutboundOutcome, UtxoSigner,
    UtxoSignerSettings,
};
use crate::tss::TssSigner;

/// Result of one outbound attempt, sent from a worker to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundReport {
    pub chain_id: i64,
    pub nonce: u64,
    pub out_tx_id: String,
    pub outcome: OutboundOutcome,
}

/// A chain signer and how often its worker polls.
#[derive(Clone)]
pub struct ChainWorker {
    pub signer: Arc<dyn ChainSigner>,
    pub polling_interval: Duration,
}

/// Selects the signer implementation for a chain by its kind tag.
///
/// # Returns
///
/// * `Ok(Some(signer))` - Signer for the chain
/// * `Ok(None)` - No signer for this chain kind; the chain is not served
/// * `Err(anyhow::Error)` - Failed to build the chain client
pub fn build_signer(
    chain: &ChainConfig,
    config: &Config,
    tss: Arc<TssSigner>,
    bridge: Arc<dyn CoreBridge>,
) -> Result<Option<Arc<dyn ChainSigner>>> {
    match chain.kind {
        ChainKind::Utxo => {
            let client = BitcoinRpcClient::new(&chain.rpc_url, chain.credentials.clone())
                .with_context(|| format!("Failed to create RPC client for chain {}", chain.chain_id))?;
            let signer = UtxoSigner::new(
                chain.chain(),
                tss,
                Arc::new(client),
                bridge,
                UtxoSignerSettings::from(&config.outbound),
            );
            Ok(Some(Arc::new(signer)))
        }
        ChainKind::Evm => {
            warn!(
                "No outbound signer for EVM chain {} ({}); chain is not served",
                chain.chain_id, chain.name
            );
            Ok(None)
        }
    }
}

pub struct Supervisor {
    bridge: Arc<dyn CoreBridge>,
    tss: Arc<TssSigner>,
    metrics: Arc<Metrics>,
    manager: OutTxProcessorManager,
    workers: Vec<ChainWorker>,
    pending_limit: u64,
    node_pubkey: String,
    shutdown: watch::Sender<bool>,
}

impl Supervisor {
    /// Creates a supervisor with one worker per configured chain that has a signer.
    pub fn new(config: &Config, bridge: Arc<dyn CoreBridge>, tss: Arc<TssSigner>, metrics: Arc<Metrics>) -> Result<Self> {
        let mut workers = Vec::new();
        for chain in &config.chains {
            if let Some(signer) = build_signer(chain, config, tss.clone(), bridge.clone())? {
                workers.push(ChainWorker {
                    signer,
                    polling_interval: Duration::from_millis(chain.polling_interval_ms),
                });
            }
        }
        Ok(Self::with_workers(
            bridge,
            tss,
            metrics,
            workers,
            config.outbound.pending_limit,
            &config.ledger.node_pubkey,
        ))
    }

    /// Creates a supervisor over already built workers.
    pub fn with_workers(
        bridge: Arc<dyn CoreBridge>,
        tss: Arc<TssSigner>,
        metrics: Arc<Metrics>,
        workers: Vec<ChainWorker>,
        pending_limit: u64,
        node_pubkey: &str,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bridge,
            tss,
            metrics,
            manager: OutTxProcessorManager::new(),
            workers,
            pending_limit,
            node_pubkey: node_pubkey.to_string(),
            shutdown,
        }
    }

    pub fn manager(&self) -> OutTxProcessorManager {
        self.manager.clone()
    }

    pub fn chains(&self) -> Vec<Chain> {
        self.workers.iter().map(|w| w.signer.chain().clone()).collect()
    }

    /// Stops new polls. `run` returns once in-flight work is done.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.send_replace(true);
    }

    /// Checks that a keyshare is held for every historical TSS this node took part in.
    ///
    /// Failures are logged and are not fatal.
    pub async fn verify_keyshares(&self) -> bool {
        let history = match self.bridge.get_tss_history().await {
            Ok(history) => history,
            Err(e) => {
                error!("Failed to fetch TSS history: {:#}", e);
                return false;
            }
        };
        match self.tss.verify_keyshares_for_pubkeys(&history, &self.node_pubkey) {
            Ok(()) => {
                info!("Keyshares verified for {} historical TSS key(s)", history.len());
                true
            }
            Err(e) => {
                error!("Keyshare verification failed: {}", e);
                false
            }
        }
    }

    fn record(&self, report: &OutboundReport) {
        self.metrics
            .inc_outbound(&report.chain_id.to_string(), report.outcome.label());
        match &report.outcome {
            OutboundOutcome::Broadcast { tx_hash } => {
                info!("outbound {} broadcast as {}", report.out_tx_id, tx_hash)
            }
            OutboundOutcome::Skipped { reason } => debug!("outbound {} skipped: {}", report.out_tx_id, reason),
            OutboundOutcome::Failed { error } => warn!("outbound {} failed: {}", report.out_tx_id, error),
        }
    }

    /// Runs every chain worker until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.verify_keyshares().await;

        let (reports_tx, mut reports) = mpsc::channel(256);
        let mut workers = JoinSet::new();
        for worker in &self.workers {
            info!(
                "Starting outbound worker for chain {} every {:?}",
                worker.signer.chain().chain_id,
                worker.polling_interval
            );
            workers.spawn(run_worker(
                worker.clone(),
                self.bridge.clone(),
                self.manager.clone(),
                self.pending_limit,
                reports_tx.clone(),
                self.shutdown.subscribe(),
            ));
        }
        drop(reports_tx);

        // closes once every worker and its tasks are gone
        while let Some(report) = reports.recv().await {
            self.record(&report);
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("chain worker terminated abnormally: {}", e);
            }
        }
        info!("All chain workers stopped");
        Ok(())
    }
}

/// Dispatches the pending outbounds of one poll.
///
/// # Returns
///
/// * `Ok(usize)` - Number of outbounds started
/// * `Err(anyhow::Error)` - Ledger query failed
pub async fn poll_once(
    signer: &Arc<dyn ChainSigner>,
    bridge: &Arc<dyn CoreBridge>,
    manager: &OutTxProcessorManager,
    pending_limit: u64,
    reports: &mpsc::Sender<OutboundReport>,
    in_flight: &mut JoinSet<()>,
) -> Result<usize> {
    let chain_id = signer.chain().chain_id;
    let pending = bridge.get_pending_cctx(chain_id, pending_limit).await?;
    if pending.is_empty() {
        return Ok(0);
    }
    let height = bridge.get_block_height().await?;

    let mut started = 0;
    for cctx in pending {
        let Some(params) = cctx.current_outbound() else {
            continue;
        };
        if params.receiver_chain_id != chain_id {
            continue;
        }
        let nonce = params.out_tx_tss_nonce;
        let id = out_tx_id(chain_id, nonce);
        let Some(guard) = manager.start_try_process(&id) else {
            continue;
        };

        let signer = signer.clone();
        let reports = reports.clone();
        in_flight.spawn(async move {
            let outcome = signer.try_process_out_tx(cctx, guard, height).await;
            let report = OutboundReport {
                chain_id,
                nonce,
                out_tx_id: id,
                outcome,
            };
            if reports.send(report).await.is_err() {
                debug!("supervisor gone; dropping report");
            }
        });
        started += 1;
    }
    Ok(started)
}

async fn run_worker(
    worker: ChainWorker,
    bridge: Arc<dyn CoreBridge>,
    manager: OutTxProcessorManager,
    pending_limit: u64,
    reports: mpsc::Sender<OutboundReport>,
    mut shutdown: watch::Receiver<bool>,
) {
    let chain_id = worker.signer.chain().chain_id;
    let mut in_flight = JoinSet::new();

    while !*shutdown.borrow() {
        match poll_once(&worker.signer, &bridge, &manager, pending_limit, &reports, &mut in_flight).await {
            Ok(0) => {}
            Ok(n) => debug!("chain {}: started {} outbound(s)", chain_id, n),
            Err(e) => warn!("chain {}: polling pending outbounds failed: {:#}", chain_id, e),
        }
        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                error!("chain {}: outbound task panicked: {}", chain_id, e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(worker.polling_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(
        "chain {}: worker stopping, waiting for {} in-flight outbound(s)",
        chain_id,
        in_flight.len()
    );
    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!("chain {}: outbound task panicked: {}", chain_id, e);
        }
    }
}
