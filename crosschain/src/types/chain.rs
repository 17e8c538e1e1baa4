//! Supported external chains

use serde::{Deserialize, Serialize};

/// Family of an external chain; selects the signer implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    /// Account-based chain with EVM semantics
    Evm,
    /// UTXO-based chain (Bitcoin style)
    Utxo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: i64,
    pub chain_name: String,
    pub kind: ChainKind,
}

impl Chain {
    pub fn is_evm_chain(&self) -> bool {
        self.kind == ChainKind::Evm
    }
}
