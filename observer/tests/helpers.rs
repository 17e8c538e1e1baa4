//! Shared test helpers
//!
//! The module is organized into several categories:
//! - **Constants**: Chains, operators and keys used across tests
//! - **Mock Ledger**: In-memory `CoreBridge`
//! - **Mock Keysign**: `KeysignServer` with scripted misbehaviour
//! - **Mock Chain**: In-memory `UtxoClient`
//! - **Builders**: TSS signers, pending CCTXs and UTXOs

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crosschain::types::{
    Blame, BlameNode, CctxStatus, Chain, ChainKind, CoinType, CrossChainTx, CrosschainFlags, Keygen, OutTxTracker,
    OutboundParams, Status, Tss, TxHashEntry,
};
use crosschain::MsgResponse;
use observer::outbound::tx::p2wpkh_script;
use observer::outbound::{Utxo, UtxoClient, UtxoSigner, UtxoSignerSettings};
use observer::tss::{KeysignRequest, KeysignResponse, KeysignStatus};
use observer::{CoreBridge, KeysignServer, LocalKeysigner, Metrics, TssError, TssSigner};

// ============================================================================
// CONSTANTS
// ============================================================================

/// UTXO chain every outbound test targets
pub const BTC_CHAIN_ID: i64 = 18444;
pub const BTC_CHAIN_NAME: &str = "btc_regtest";

pub const OPERATOR: &str = "observer-1";

/// Secret of the TSS key used by the local keysign backend
pub const TSS_SECRET: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// Secret of a key that is not the TSS
pub const OTHER_SECRET: &str = "8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f";

/// Node pubkey listed as TSS participant
pub const NODE_PUBKEY: &str = "zetapub1node0";

/// Receiver witness program (hex)
pub const RECEIVER: &str = "00112233445566778899aabbccddeeff00112233";

/// Fee rate in sats per kB
pub const GAS_PRICE: u64 = 10;

/// Ledger height answered by the mock bridge
pub const LEDGER_HEIGHT: u64 = 42;

// ============================================================================
// MOCK LEDGER
// ============================================================================

#[derive(Default)]
pub struct BridgeState {
    pub pending: Vec<CrossChainTx>,
    pub trackers: BTreeMap<(i64, u64), OutTxTracker>,
    pub tss_history: Vec<Tss>,
    pub flags: CrosschainFlags,
    pub keygen: Option<Keygen>,
    /// (chain, nonce, hash) of every tracker submission
    pub submitted_hashes: Vec<(i64, u64, String)>,
    pub blames: Vec<(i64, Blame)>,
    pub fail_blame_post: bool,
    pub fail_pending: bool,
}

/// In-memory ledger.
#[derive(Clone, Default)]
pub struct MockBridge {
    pub state: Arc<Mutex<BridgeState>>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending(pending: Vec<CrossChainTx>) -> Self {
        let bridge = Self::new();
        bridge.state.lock().unwrap().pending = pending;
        bridge
    }

    pub fn set_tracker(&self, chain_id: i64, nonce: u64, hash: &str) {
        self.state.lock().unwrap().trackers.insert(
            (chain_id, nonce),
            OutTxTracker {
                index: OutTxTracker::index_for(chain_id, nonce),
                chain_id,
                nonce,
                hash_list: vec![TxHashEntry {
                    tx_hash: hash.to_string(),
                    tx_signer: OPERATOR.to_string(),
                    proved: false,
                }],
            },
        );
    }

    pub fn set_outbound_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().flags.is_outbound_enabled = enabled;
    }

    pub fn submitted_hashes(&self) -> Vec<(i64, u64, String)> {
        self.state.lock().unwrap().submitted_hashes.clone()
    }

    pub fn blames(&self) -> Vec<(i64, Blame)> {
        self.state.lock().unwrap().blames.clone()
    }
}

#[async_trait]
impl CoreBridge for MockBridge {
    fn operator(&self) -> &str {
        OPERATOR
    }

    async fn get_block_height(&self) -> Result<u64> {
        Ok(LEDGER_HEIGHT)
    }

    async fn get_pending_cctx(&self, chain_id: i64, limit: u64) -> Result<Vec<CrossChainTx>> {
        let state = self.state.lock().unwrap();
        if state.fail_pending {
            anyhow::bail!("ledger unavailable");
        }
        Ok(state
            .pending
            .iter()
            .filter(|c| c.current_outbound().map(|o| o.receiver_chain_id) == Some(chain_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_out_tx_tracker(&self, chain_id: i64, nonce: u64) -> Result<Option<OutTxTracker>> {
        Ok(self.state.lock().unwrap().trackers.get(&(chain_id, nonce)).cloned())
    }

    async fn get_tss_history(&self) -> Result<Vec<Tss>> {
        Ok(self.state.lock().unwrap().tss_history.clone())
    }

    async fn get_crosschain_flags(&self) -> Result<CrosschainFlags> {
        Ok(self.state.lock().unwrap().flags.clone())
    }

    async fn get_keygen(&self) -> Result<Option<Keygen>> {
        Ok(self.state.lock().unwrap().keygen.clone())
    }

    async fn add_tx_hash_to_out_tx_tracker(&self, chain_id: i64, nonce: u64, tx_hash: &str) -> Result<MsgResponse> {
        self.state
            .lock()
            .unwrap()
            .submitted_hashes
            .push((chain_id, nonce, tx_hash.to_string()));
        Ok(MsgResponse::default())
    }

    async fn post_blame_data(&self, chain_id: i64, blame: Blame) -> Result<MsgResponse> {
        let mut state = self.state.lock().unwrap();
        if state.fail_blame_post {
            anyhow::bail!("blame vote rejected");
        }
        state.blames.push((chain_id, blame));
        Ok(MsgResponse {
            ballot_identifier: Some("blame-ballot".to_string()),
            finalized: false,
            cctx_index: None,
        })
    }
}

// ============================================================================
// MOCK KEYSIGN
// ============================================================================

/// How the mock keysign server answers.
#[derive(Clone)]
pub enum KeysignMode {
    /// Sign with the TSS key
    Honest,
    /// Report a failed round blaming these pubkeys
    Fail(Vec<String>),
    /// Sign honestly but drop the last signature
    DropLast,
    /// Sign with a key that is not the TSS
    WrongKey,
    /// Sign honestly but answer every signature with the first message
    MislabelMessages,
    /// Never answer
    Hang,
}

pub struct MockKeysignServer {
    pub tss: LocalKeysigner,
    pub other: LocalKeysigner,
    pub mode: Mutex<KeysignMode>,
    pub requests: Mutex<Vec<KeysignRequest>>,
}

impl MockKeysignServer {
    pub fn new(mode: KeysignMode) -> Self {
        Self {
            tss: LocalKeysigner::from_hex(TSS_SECRET).unwrap(),
            other: LocalKeysigner::from_hex(OTHER_SECRET).unwrap(),
            mode: Mutex::new(mode),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: KeysignMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl KeysignServer for MockKeysignServer {
    async fn keysign(&self, request: KeysignRequest) -> Result<KeysignResponse, TssError> {
        self.requests.lock().unwrap().push(request.clone());
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            KeysignMode::Honest => self.tss.keysign(request).await,
            KeysignMode::Fail(pubkeys) => Ok(KeysignResponse {
                status: KeysignStatus::Fail,
                signatures: Vec::new(),
                blame: Blame {
                    index: String::new(),
                    failure_reason: "party timeout".to_string(),
                    nodes: pubkeys
                        .into_iter()
                        .map(|pubkey| BlameNode {
                            pubkey,
                            ..Default::default()
                        })
                        .collect(),
                },
            }),
            KeysignMode::DropLast => {
                let mut response = self.tss.keysign(request).await?;
                response.signatures.pop();
                Ok(response)
            }
            KeysignMode::WrongKey => {
                let mut forged = request;
                forged.pool_pubkey = self.other.pubkey().to_string();
                self.other.keysign(forged).await
            }
            KeysignMode::MislabelMessages => {
                let first = request.messages[0].clone();
                let mut response = self.tss.keysign(request).await?;
                for signature in &mut response.signatures {
                    signature.msg = first.clone();
                }
                Ok(response)
            }
            KeysignMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("keysign round never completes")
            }
        }
    }
}

pub fn tss_pubkey() -> String {
    LocalKeysigner::from_hex(TSS_SECRET).unwrap().pubkey().to_string()
}

pub fn other_pubkey() -> String {
    LocalKeysigner::from_hex(OTHER_SECRET).unwrap().pubkey().to_string()
}

/// TSS signer over `server` and `bridge` with a 200 ms round timeout.
pub fn tss_signer(server: Arc<MockKeysignServer>, bridge: MockBridge, metrics: Arc<Metrics>) -> TssSigner {
    TssSigner::new(
        server,
        Arc::new(bridge),
        metrics,
        &tss_pubkey(),
        Duration::from_millis(200),
    )
    .unwrap()
}

// ============================================================================
// MOCK CHAIN
// ============================================================================

#[derive(Default)]
pub struct ChainState {
    pub utxos: Vec<Utxo>,
    pub fail_list_unspent: bool,
    /// Broadcast attempts that fail before one succeeds
    pub broadcast_failures: usize,
    pub broadcast_attempts: usize,
    pub broadcasted: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockUtxoClient {
    pub state: Arc<Mutex<ChainState>>,
}

impl MockUtxoClient {
    pub fn with_utxos(utxos: Vec<Utxo>) -> Self {
        let client = Self::default();
        client.state.lock().unwrap().utxos = utxos;
        client
    }

    pub fn fail_broadcasts(&self, n: usize) {
        self.state.lock().unwrap().broadcast_failures = n;
    }

    pub fn broadcast_attempts(&self) -> usize {
        self.state.lock().unwrap().broadcast_attempts
    }

    pub fn broadcasted(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasted.clone()
    }
}

#[async_trait]
impl UtxoClient for MockUtxoClient {
    async fn list_unspent(&self) -> Result<Vec<Utxo>> {
        let state = self.state.lock().unwrap();
        if state.fail_list_unspent {
            anyhow::bail!("rpc unavailable");
        }
        Ok(state.utxos.clone())
    }

    async fn send_raw_transaction(&self, raw_tx_hex: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.broadcast_attempts += 1;
        if state.broadcast_failures > 0 {
            state.broadcast_failures -= 1;
            anyhow::bail!("connection reset");
        }
        state.broadcasted.push(raw_tx_hex.to_string());
        Ok(format!("{:064x}", state.broadcasted.len()))
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

/// Script of the TSS address, hex.
pub fn tss_script_hex() -> String {
    let key = observer::tss::TssKey::new(&tss_pubkey()).unwrap();
    hex::encode(p2wpkh_script(&key.witness_program()))
}

/// UTXO paying `sats` to the TSS address.
pub fn tss_utxo(seed: u8, sats: u64) -> Utxo {
    Utxo {
        txid: hex::encode([seed; 32]),
        vout: 0,
        amount: sats as f64 / 100_000_000.0,
        script_pub_key: tss_script_hex(),
        confirmations: 6,
    }
}

/// Pending gas-coin outbound to `RECEIVER` on the BTC chain.
pub fn pending_cctx(nonce: u64, amount: u64) -> CrossChainTx {
    CrossChainTx {
        creator: OPERATOR.to_string(),
        index: format!("0xcctx{:04}", nonce),
        cctx_status: Status {
            status: CctxStatus::PendingOutbound,
            ..Default::default()
        },
        outbound_tx_params: vec![OutboundParams {
            receiver: RECEIVER.to_string(),
            receiver_chain_id: BTC_CHAIN_ID,
            coin_type: CoinType::Gas,
            amount: amount as u128,
            out_tx_tss_nonce: nonce,
            out_tx_gas_limit: 1000,
            out_tx_gas_price: GAS_PRICE.to_string(),
            tss_pubkey: tss_pubkey(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Unique temporary directory under the system temp dir.
pub fn temp_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "observer-test-{}-{}-{}",
        name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn btc_chain() -> Chain {
    Chain {
        chain_id: BTC_CHAIN_ID,
        chain_name: BTC_CHAIN_NAME.to_string(),
        kind: ChainKind::Utxo,
    }
}

/// UTXO signer over the mocks, five broadcast attempts and no jitter.
pub fn utxo_signer(server: Arc<MockKeysignServer>, bridge: MockBridge, client: MockUtxoClient) -> UtxoSigner {
    let metrics = Arc::new(Metrics::new().unwrap());
    let tss = Arc::new(tss_signer(server, bridge.clone(), metrics));
    UtxoSigner::new(
        btc_chain(),
        tss,
        Arc::new(client),
        Arc::new(bridge),
        UtxoSignerSettings {
            broadcast_attempts: 5,
            max_jitter_ms: 0,
        },
    )
}
