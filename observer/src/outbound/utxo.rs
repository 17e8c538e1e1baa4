//! UTXO chain signer
//!
//! Pays a gas-coin outbound on a Bitcoin-style chain from the TSS address.
//! The transaction always has the same shape:
//!
//! 0. nonce mark to the TSS address (`NONCE_MARK_BASE + nonce` sats)
//! 1. payment to the receiver
//! 2. remainder back to the TSS address, when positive
//!
//! Every input spends a P2WPKH output of the TSS key and is signed in one
//! batch round.

use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crosschain::types::{Chain, CoinType, CrossChainTx};

use super::rpc::{Utxo, UtxoClient};
use super::tx::{der_signature, p2wpkh_script, witness_program, OutPoint, Transaction, SIGHASH_ALL};
use super::{ChainSigner, OutboundError, OutboundOutcome, ProcessGuard};
use crate::bridge::CoreBridge;
use crate::config::OutboundConfig;
use crate::tss::{TssError, TssSigner};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const MAX_NO_OF_INPUTS_PER_TX: usize = 20;
/// Lower bound of the size used for fees
pub const OUT_TX_BYTES_MIN: u64 = 400;
/// Size assumed when estimating the fee before inputs are known
pub const OUT_TX_BYTES_MAX: u64 = 4000;
/// Upper bound of the size used for fees
pub const OUT_TX_BYTES_CAP: u64 = 10_000;
pub const BYTES_PER_KB: u64 = 1000;
/// Witness item count, DER signature with sighash byte, compressed pubkey
pub const WITNESS_BYTES_PER_INPUT: u64 = 108;
const SEGWIT_MARKER_BYTES: u64 = 2;
pub const NONCE_MARK_BASE: u64 = 2000;

// ============================================================================
// PURE HELPERS
// ============================================================================

/// Value of the nonce mark output for `nonce`.
pub fn nonce_mark_amount(nonce: u64) -> u64 {
    NONCE_MARK_BASE.saturating_add(nonce)
}

/// Sats the inputs must cover before the real fee is known.
pub fn withdraw_target(amount: u64, gas_price: u64, nonce: u64) -> Result<u64, OutboundError> {
    amount
        .checked_add(estimate_fee(gas_price))
        .and_then(|v| v.checked_add(nonce_mark_amount(nonce)))
        .ok_or_else(|| OutboundError::InvalidAmount(amount.to_string()))
}

/// Fee reserved while selecting inputs. `gas_price` is in sats per kB.
pub fn estimate_fee(gas_price: u64) -> u64 {
    gas_price.saturating_mul(OUT_TX_BYTES_MAX) / BYTES_PER_KB
}

/// Estimated signed size of `tx` once every input carries a P2WPKH witness.
pub fn estimate_tx_size(tx: &Transaction) -> u64 {
    tx.serialize_no_witness().len() as u64 + SEGWIT_MARKER_BYTES + tx.inputs.len() as u64 * WITNESS_BYTES_PER_INPUT
}

/// Clamps the estimated transaction size into `[OUT_TX_BYTES_MIN, OUT_TX_BYTES_CAP]`.
///
/// A size above the outbound's `size_limit` is only logged: the sender paid
/// for less than the transaction costs, but the outbound still goes out.
pub fn clamp_tx_size(tx_size: u64, size_limit: u64) -> u64 {
    if tx_size > size_limit {
        info!("size limit {} is less than tx size {}", size_limit, tx_size);
    }
    if tx_size < OUT_TX_BYTES_MIN {
        debug!("tx size {} is less than outTxBytesMin {}; use outTxBytesMin", tx_size, OUT_TX_BYTES_MIN);
        return OUT_TX_BYTES_MIN;
    }
    if tx_size > OUT_TX_BYTES_CAP {
        warn!("tx size {} is greater than outTxBytesCap {}; use outTxBytesCap", tx_size, OUT_TX_BYTES_CAP);
        return OUT_TX_BYTES_CAP;
    }
    tx_size
}

pub fn parse_gas_price(gas_price: &str) -> Result<u64, OutboundError> {
    gas_price
        .trim()
        .parse::<u64>()
        .map_err(|_| OutboundError::InvalidGasPrice(gas_price.to_string()))
}

/// Parses a receiver given as a hex P2WPKH witness program.
pub fn parse_receiver(receiver: &str) -> Result<[u8; 20], OutboundError> {
    let trimmed = receiver.strip_prefix("0x").unwrap_or(receiver);
    hex::decode(trimmed)
        .ok()
        .and_then(|bytes| <[u8; 20]>::try_from(bytes).ok())
        .ok_or_else(|| OutboundError::InvalidReceiver(receiver.to_string()))
}

/// Picks inputs covering `target` from `utxos` (ascending by value).
///
/// Takes the smallest outputs first. Once `MAX_NO_OF_INPUTS_PER_TX` inputs
/// are in the window and the target is still not covered, the window slides
/// towards larger outputs.
///
/// # Returns
///
/// * `Ok((Vec<Utxo>, u64))` - Selected inputs and their total value
/// * `Err(OutboundError::NoUtxos)` - Nothing to spend
/// * `Err(OutboundError::InsufficientFunds)` - No window covers `target`
pub fn select_utxos(utxos: &[Utxo], target: u64) -> Result<(Vec<Utxo>, u64), OutboundError> {
    if utxos.is_empty() {
        return Err(OutboundError::NoUtxos);
    }
    let mut total = 0u64;
    let (mut left, mut right) = (0usize, 0usize);
    while total < target && right < utxos.len() {
        if right - left < MAX_NO_OF_INPUTS_PER_TX {
            total += utxos[right].value_sats();
        } else {
            total = total - utxos[left].value_sats() + utxos[right].value_sats();
            left += 1;
        }
        right += 1;
    }
    if total < target {
        return Err(OutboundError::InsufficientFunds {
            needed: target,
            available: total,
        });
    }
    Ok((utxos[left..right].to_vec(), total))
}

/// One withdrawal before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawTx {
    pub tx: Transaction,
    /// Value of each input, in input order
    pub input_values: Vec<u64>,
    pub fees: u64,
    pub remainder: u64,
}

/// Builds the unsigned withdrawal spending `inputs`.
///
/// # Arguments
///
/// * `inputs` - Selected TSS outputs
/// * `total` - Sum of `inputs` in sats
/// * `own` - Witness program of the TSS key
/// * `receiver` - Witness program of the receiver
/// * `amount` - Payment in sats
/// * `gas_price` - Fee rate in sats per kB
/// * `size_limit` - Size the sender paid for, from the outbound's gas limit
/// * `nonce` - Outbound nonce
///
/// The fee is the estimated signed size, clamped, times `gas_price`.
#[allow(clippy::too_many_arguments)]
pub fn build_withdraw_tx(
    inputs: &[Utxo],
    total: u64,
    own: &[u8; 20],
    receiver: &[u8; 20],
    amount: u64,
    gas_price: u64,
    size_limit: u64,
    nonce: u64,
) -> Result<WithdrawTx, OutboundError> {
    let mut tx = Transaction::new();
    let mut input_values = Vec::with_capacity(inputs.len());
    for utxo in inputs {
        let outpoint = OutPoint::from_display(&utxo.txid, utxo.vout).map_err(OutboundError::InvalidUtxo)?;
        tx.add_input(outpoint);
        input_values.push(utxo.value_sats());
    }

    let nonce_mark = nonce_mark_amount(nonce);
    tx.add_output(nonce_mark, p2wpkh_script(own));
    tx.add_output(amount, p2wpkh_script(receiver));
    // sized with the change output; its value is set below
    tx.add_output(0, p2wpkh_script(own));

    let tx_size = clamp_tx_size(estimate_tx_size(&tx), size_limit);
    let fees = tx_size.saturating_mul(gas_price) / BYTES_PER_KB;
    info!("outbound nonce {} gas price {} size {} fees {}", nonce, gas_price, tx_size, fees);

    let spent = withdraw_target(amount, 0, nonce)?
        .checked_add(fees)
        .ok_or_else(|| OutboundError::InvalidAmount(amount.to_string()))?;
    let mut remainder = match total.checked_sub(spent) {
        Some(remainder) => remainder,
        None => {
            let shortfall = i64::try_from(spent - total).unwrap_or(i64::MAX);
            warn!("remainder value is negative: -{}", shortfall);
            return Err(OutboundError::NegativeRemainder(-shortfall));
        }
    };
    if remainder == nonce_mark {
        info!("adjust remainder value to avoid duplicate nonce-mark: {}", remainder);
        remainder -= 1;
    }

    if remainder > 0 {
        if let Some(change) = tx.outputs.last_mut() {
            change.value = remainder;
        }
    } else {
        tx.outputs.pop();
    }

    Ok(WithdrawTx {
        tx,
        input_values,
        fees,
        remainder,
    })
}

// ============================================================================
// SIGNER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtxoSignerSettings {
    pub broadcast_attempts: u32,
    pub max_jitter_ms: u64,
}

impl From<&OutboundConfig> for UtxoSignerSettings {
    fn from(config: &OutboundConfig) -> Self {
        Self {
            broadcast_attempts: config.broadcast_attempts,
            max_jitter_ms: config.max_jitter_ms,
        }
    }
}

pub struct UtxoSigner {
    chain: Chain,
    tss: Arc<TssSigner>,
    client: Arc<dyn UtxoClient>,
    bridge: Arc<dyn CoreBridge>,
    settings: UtxoSignerSettings,
    /// Spendable TSS outputs, ascending by value
    utxos: RwLock<Vec<Utxo>>,
    /// Broadcast hash per nonce
    broadcasted: RwLock<BTreeMap<u64, String>>,
}

impl UtxoSigner {
    pub fn new(
        chain: Chain,
        tss: Arc<TssSigner>,
        client: Arc<dyn UtxoClient>,
        bridge: Arc<dyn CoreBridge>,
        settings: UtxoSignerSettings,
    ) -> Self {
        Self {
            chain,
            tss,
            client,
            bridge,
            settings,
            utxos: RwLock::new(Vec::new()),
            broadcasted: RwLock::new(BTreeMap::new()),
        }
    }

    fn own_program(&self) -> [u8; 20] {
        self.tss.current().witness_program()
    }

    /// Reloads the spendable outputs paying the TSS address.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of spendable outputs
    /// * `Err(anyhow::Error)` - RPC failure; the previous set is kept
    pub async fn refresh_unspent_utxos(&self) -> anyhow::Result<usize> {
        let own_script = hex::encode(p2wpkh_script(&self.own_program()));
        let mut utxos: Vec<Utxo> = self
            .client
            .list_unspent()
            .await?
            .into_iter()
            .filter(|u| u.script_pub_key.eq_ignore_ascii_case(&own_script))
            .collect();
        utxos.sort_by_key(|u| u.value_sats());

        let count = utxos.len();
        *self.utxos.write().await = utxos;
        debug!("chain {}: {} spendable utxos", self.chain.chain_id, count);
        Ok(count)
    }

    pub async fn utxos(&self) -> Vec<Utxo> {
        self.utxos.read().await.clone()
    }

    /// Builds and signs the withdrawal for one outbound.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Witness program of the receiver
    /// * `amount` - Payment in sats
    /// * `gas_price` - Fee rate in sats per kB
    /// * `size_limit` - Size budget from the outbound's gas limit
    /// * `height` - Ledger height anchoring the signing round
    /// * `nonce` - Outbound nonce
    ///
    /// # Returns
    ///
    /// * `Ok(Transaction)` - Fully witnessed transaction
    /// * `Err(OutboundError)` - Not enough funds or the signing round failed
    pub async fn sign_withdraw_tx(
        &self,
        receiver: &[u8; 20],
        amount: u64,
        gas_price: u64,
        size_limit: u64,
        height: u64,
        nonce: u64,
    ) -> Result<Transaction, OutboundError> {
        let target = withdraw_target(amount, gas_price, nonce)?;

        // a stale set is still usable
        if let Err(e) = self.refresh_unspent_utxos().await {
            error!("SignWithdrawTx: refresh utxos error: {:#}", e);
        }

        let (inputs, total) = select_utxos(&self.utxos().await, target)?;
        let own = self.own_program();
        let WithdrawTx {
            mut tx, input_values, ..
        } = build_withdraw_tx(&inputs, total, &own, receiver, amount, gas_price, size_limit, nonce)?;

        let mut digests = Vec::with_capacity(inputs.len());
        for (ix, utxo) in inputs.iter().enumerate() {
            let script = hex::decode(&utxo.script_pub_key)
                .map_err(|e| OutboundError::InvalidUtxo(format!("script of {}: {}", utxo.txid, e)))?;
            let program = witness_program(&script)
                .ok_or_else(|| OutboundError::InvalidUtxo(format!("{} is not P2WPKH", utxo.txid)))?;
            let digest = tx
                .witness_sighash(ix, &program, input_values[ix])
                .ok_or_else(|| OutboundError::InvalidUtxo(format!("no input {}", ix)))?;
            digests.push(digest);
        }

        let signatures = self
            .tss
            .sign_batch(&digests, height, nonce, self.chain.chain_id)
            .await?;

        let pubkey = self.tss.current().compressed.clone();
        for (input, sig) in tx.inputs.iter_mut().zip(&signatures) {
            let mut der = der_signature(sig)
                .map_err(|e| OutboundError::Signing(TssError::SignatureVerificationFailed(e.to_string())))?;
            der.push(SIGHASH_ALL);
            input.witness = vec![der, pubkey.clone()];
        }
        Ok(tx)
    }

    /// Broadcasts `tx`, retrying with random jitter before every attempt.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Txid reported by the first successful attempt
    /// * `Err(OutboundError::Rpc)` - Every attempt failed
    pub async fn broadcast(&self, tx: &Transaction, nonce: u64) -> Result<String, OutboundError> {
        let raw = hex::encode(tx.serialize());
        let mut last_error = String::from("no broadcast attempt made");
        for attempt in 0..self.settings.broadcast_attempts {
            let delay = rand::thread_rng().gen_range(0..=self.settings.max_jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            match self.client.send_raw_transaction(&raw).await {
                Ok(hash) => {
                    info!(
                        "Broadcast success: nonce {} to chain {} outTxHash {}",
                        nonce, self.chain.chain_id, hash
                    );
                    return Ok(hash);
                }
                Err(e) => {
                    warn!(
                        "broadcasting tx to chain {} nonce {}: attempt {}/{} failed: {:#}",
                        self.chain.chain_id,
                        nonce,
                        attempt + 1,
                        self.settings.broadcast_attempts,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }
        Err(OutboundError::Rpc(last_error))
    }

    pub async fn save_broadcasted_tx(&self, nonce: u64, tx_hash: &str) {
        self.broadcasted.write().await.insert(nonce, tx_hash.to_string());
    }

    pub async fn broadcasted_tx(&self, nonce: u64) -> Option<String> {
        self.broadcasted.read().await.get(&nonce).cloned()
    }

    /// True when this node already broadcast `nonce` or the ledger tracker holds a hash for it.
    pub async fn is_out_tx_processed(&self, nonce: u64) -> anyhow::Result<bool> {
        if self.broadcasted.read().await.contains_key(&nonce) {
            return Ok(true);
        }
        let tracker = self
            .bridge
            .get_out_tx_tracker(self.chain.chain_id, nonce)
            .await?;
        Ok(tracker.map(|t| !t.hash_list.is_empty()).unwrap_or(false))
    }

    async fn process(&self, cctx: &CrossChainTx, height: u64) -> Result<OutboundOutcome, OutboundError> {
        let params = cctx.current_outbound_or_default();
        let nonce = params.out_tx_tss_nonce;

        if params.receiver_chain_id != self.chain.chain_id {
            return Ok(OutboundOutcome::Skipped {
                reason: format!("outbound targets chain {}", params.receiver_chain_id),
            });
        }
        if params.coin_type != CoinType::Gas {
            return Err(OutboundError::UnsupportedCoinType(format!("{:?}", params.coin_type)));
        }

        match self.is_out_tx_processed(nonce).await {
            Ok(true) => {
                info!("outbound nonce {} chain {} already processed; skip", nonce, self.chain.chain_id);
                return Ok(OutboundOutcome::Skipped {
                    reason: "already processed".to_string(),
                });
            }
            Ok(false) => {}
            Err(e) => return Err(OutboundError::Rpc(format!("checking tracker: {:#}", e))),
        }

        let flags = self
            .bridge
            .get_crosschain_flags()
            .await
            .map_err(|e| OutboundError::Rpc(format!("fetching flags: {:#}", e)))?;
        if !flags.is_outbound_enabled {
            info!("outbound is disabled; skip nonce {}", nonce);
            return Ok(OutboundOutcome::Skipped {
                reason: "outbound is disabled".to_string(),
            });
        }

        let gas_price = parse_gas_price(&params.out_tx_gas_price)?;
        let receiver = parse_receiver(&params.receiver)?;
        let amount = u64::try_from(params.amount).map_err(|_| OutboundError::InvalidAmount(params.amount.to_string()))?;

        info!(
            "SignWithdrawTx: to {} amount {} sats nonce {} chain {}",
            params.receiver, amount, nonce, self.chain.chain_id
        );
        let tx = self
            .sign_withdraw_tx(&receiver, amount, gas_price, params.out_tx_gas_limit, height, nonce)
            .await?;

        let tx_hash = self.broadcast(&tx, nonce).await?;
        if let Err(e) = self
            .bridge
            .add_tx_hash_to_out_tx_tracker(self.chain.chain_id, nonce, &tx_hash)
            .await
        {
            error!(
                "unable to add to tracker on chain {} nonce {}: {:#}",
                self.chain.chain_id, nonce, e
            );
        }
        self.save_broadcasted_tx(nonce, &tx_hash).await;
        Ok(OutboundOutcome::Broadcast { tx_hash })
    }
}

#[async_trait]
impl ChainSigner for UtxoSigner {
    fn chain(&self) -> &Chain {
        &self.chain
    }

    async fn try_process_out_tx(&self, cctx: CrossChainTx, guard: ProcessGuard, height: u64) -> OutboundOutcome {
        let _guard = guard;
        match self.process(&cctx, height).await {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    OutboundError::Signing(tss) if tss.is_invariant_violation() => {
                        error!("outbound {} signing invariant violated: {}", cctx.index, e)
                    }
                    _ => warn!("outbound {} failed: {}", cctx.index, e),
                }
                OutboundOutcome::Failed { error: e.to_string() }
            }
        }
    }
}
