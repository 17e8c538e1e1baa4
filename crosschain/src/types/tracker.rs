//! Outbound tracker records

use serde::{Deserialize, Serialize};

/// Maximum distinct broadcast hashes kept per (chain, nonce).
pub const MAX_OUT_TX_TRACKER_HASHES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHashEntry {
    pub tx_hash: String,
    pub tx_signer: String,
    pub proved: bool,
}

/// Broadcast hashes observed for one expected (chain, nonce) outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutTxTracker {
    /// `{chain_id}-{nonce}`
    pub index: String,
    pub chain_id: i64,
    pub nonce: u64,
    pub hash_list: Vec<TxHashEntry>,
}

impl OutTxTracker {
    pub fn index_for(chain_id: i64, nonce: u64) -> String {
        format!("{}-{}", chain_id, nonce)
    }

    pub fn contains_hash(&self, tx_hash: &str) -> bool {
        self.hash_list
            .iter()
            .any(|h| h.tx_hash.eq_ignore_ascii_case(tx_hash))
    }
}
