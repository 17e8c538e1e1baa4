//! Foreign asset mappings used for refunds

use serde::{Deserialize, Serialize};

use super::cctx::CoinType;

/// Ledger-side representation of an asset living on an external chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignCoin {
    /// Ledger token that represents the asset
    pub zrc20_contract_address: String,
    /// Asset address on the external chain (empty for gas tokens)
    pub asset: String,
    pub foreign_chain_id: i64,
    pub decimals: u32,
    pub name: String,
    pub symbol: String,
    pub coin_type: CoinType,
}
