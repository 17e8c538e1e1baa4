//! Outbound Dispatch Module
//!
//! Builds chain-native transactions for pending outbounds, has them signed by
//! the TSS coordinator, broadcasts them and reports the broadcast hash back to
//! the ledger's outbound tracker.
//!
//! Each chain kind implements [`ChainSigner`]; the supervisor picks the
//! implementation by the chain's kind tag at startup.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: An outbound whose tracker already holds a hash, or that this
//! node already broadcast, is never signed again. The check runs before any
//! signing work begins.

mod manager;
pub mod rpc;
pub mod tx;
pub mod utxo;

pub use manager::{out_tx_id, OutTxProcessorManager, ProcessGuard};
pub use rpc::{BitcoinRpcClient, Utxo, UtxoClient};
pub use utxo::{UtxoSigner, UtxoSignerSettings};

use async_trait::async_trait;
use thiserror::Error;

use crosschain::types::{Chain, CrossChainTx};

use crate::tss::TssError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutboundError {
    #[error("insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("no spendable utxos")]
    NoUtxos,
    #[error("invalid receiver {0}")]
    InvalidReceiver(String),
    #[error("invalid amount {0}")]
    InvalidAmount(String),
    #[error("invalid gas price {0}")]
    InvalidGasPrice(String),
    #[error("unsupported coin type {0}")]
    UnsupportedCoinType(String),
    #[error("invalid utxo: {0}")]
    InvalidUtxo(String),
    #[error("remainder value is negative: {0}")]
    NegativeRemainder(i64),
    #[error(transparent)]
    Signing(#[from] TssError),
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// What happened to one outbound attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundOutcome {
    Broadcast { tx_hash: String },
    Skipped { reason: String },
    Failed { error: String },
}

impl OutboundOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            OutboundOutcome::Broadcast { .. } => "broadcast",
            OutboundOutcome::Skipped { .. } => "skipped",
            OutboundOutcome::Failed { .. } => "failed",
        }
    }
}

/// Per-chain outbound capability.
#[async_trait]
pub trait ChainSigner: Send + Sync {
    fn chain(&self) -> &Chain;

    /// Signs and broadcasts the current outbound of `cctx`.
    ///
    /// `guard` is held for the whole attempt and released on every exit path.
    ///
    /// # Arguments
    ///
    /// * `cctx` - Pending transfer whose current outbound targets this chain
    /// * `guard` - In-flight marker from the processor manager
    /// * `height` - Ledger height anchoring the signing round
    async fn try_process_out_tx(&self, cctx: CrossChainTx, guard: ProcessGuard, height: u64) -> OutboundOutcome;
}
