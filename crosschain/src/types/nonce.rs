//! Nonce counters
//!
//! `ChainNonces` is the next nonce to hand out on a destination chain.
//! `PendingNonces` is the `[nonce_low, nonce_high)` window of nonces that were
//! assigned under one signing key but are not yet confirmed. The allocator
//! keeps `nonce_high == ChainNonces.nonce` at all times.

use serde::{Deserialize, Serialize};

/// Next nonce to assign on a chain, keyed by chain name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainNonces {
    pub chain_name: String,
    pub chain_id: i64,
    pub nonce: u64,
}

/// Assigned-but-unconfirmed window for one (signing key, chain) pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PendingNonces {
    pub tss: String,
    pub chain_id: i64,
    pub nonce_low: u64,
    pub nonce_high: u64,
}

impl PendingNonces {
    /// True when `nonce` is assigned but not yet confirmed.
    pub fn contains(&self, nonce: u64) -> bool {
        nonce >= self.nonce_low && nonce < self.nonce_high
    }
}
