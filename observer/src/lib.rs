//! Observer Service Library
//!
//! Off-chain side of the cross-chain transfer protocol. An observer node
//! polls the ledger for pending outbounds, signs them with the threshold key,
//! broadcasts them to the destination chain and reports the broadcast hash
//! back to the ledger's outbound tracker. It also verifies inbound inclusion
//! proofs before trusting a claimed deposit.

pub mod api;
pub mod bridge;
pub mod config;
pub mod hash;
pub mod metrics;
pub mod monitor;
pub mod outbound;
pub mod proof;
pub mod tss;

// Re-export commonly used types
pub use bridge::{CoreBridge, HttpCoreBridge};
pub use config::{ApiConfig, ChainConfig, Config, OutboundConfig, TssConfig};
pub use metrics::Metrics;
pub use monitor::{OutboundReport, Supervisor};
pub use outbound::{ChainSigner, OutTxProcessorManager, OutboundError, OutboundOutcome};
pub use proof::{BlockHeader, MerkleProof, MerkleTree, ProofError};
pub use tss::{KeysignServer, LocalKeysigner, TssError, TssSigner};
