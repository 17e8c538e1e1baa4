//! Cross-chain transaction records
//!
//! A `CrossChainTx` (CCTX) tracks one transfer from its source chain to its
//! destination chain. The outbound attempts are kept as an ordered list whose
//! last element is always the attempt currently in flight; a second element is
//! only ever appended to revert the transfer back to the sender chain.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CrosschainError;

/// Maximum number of outbound attempts: the forward transfer plus one revert.
pub const MAX_OUTBOUND_PARAMS: usize = 2;

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle state of a CCTX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CctxStatus {
    /// Inbound observed, CCTX not yet processed
    PendingInbound,
    /// Outbound to the destination chain awaiting signature/confirmation
    PendingOutbound,
    /// Outbound confirmed on the destination chain (terminal)
    OutboundMined,
    /// Revert outbound to the sender chain awaiting signature/confirmation
    PendingRevert,
    /// Revert outbound confirmed on the sender chain (terminal)
    Reverted,
    /// No safe forwarding or reverting path (terminal)
    Aborted,
}

impl CctxStatus {
    /// Returns true for states that never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CctxStatus::OutboundMined | CctxStatus::Reverted | CctxStatus::Aborted
        )
    }

    /// Returns true for states with an outbound in flight.
    pub fn is_pending_outbound(self) -> bool {
        matches!(self, CctxStatus::PendingOutbound | CctxStatus::PendingRevert)
    }

    /// Checks whether `self -> next` is one of the allowed transitions.
    ///
    /// ```text
    /// PendingInbound -> PendingOutbound -> OutboundMined
    /// PendingOutbound -> PendingRevert -> Reverted
    /// any pending state -> Aborted
    /// ```
    pub fn can_transition_to(self, next: CctxStatus) -> bool {
        use CctxStatus::*;
        matches!(
            (self, next),
            (PendingInbound, PendingOutbound)
                | (PendingOutbound, OutboundMined)
                | (PendingOutbound, PendingRevert)
                | (PendingRevert, Reverted)
                | (PendingInbound, Aborted)
                | (PendingOutbound, Aborted)
                | (PendingRevert, Aborted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CctxStatus::PendingInbound => "pending_inbound",
            CctxStatus::PendingOutbound => "pending_outbound",
            CctxStatus::OutboundMined => "outbound_mined",
            CctxStatus::PendingRevert => "pending_revert",
            CctxStatus::Reverted => "reverted",
            CctxStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for CctxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CctxStatus {
    type Err = CrosschainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_inbound" => Ok(CctxStatus::PendingInbound),
            "pending_outbound" => Ok(CctxStatus::PendingOutbound),
            "outbound_mined" => Ok(CctxStatus::OutboundMined),
            "pending_revert" => Ok(CctxStatus::PendingRevert),
            "reverted" => Ok(CctxStatus::Reverted),
            "aborted" => Ok(CctxStatus::Aborted),
            other => Err(CrosschainError::InvalidRequest(format!(
                "unknown cctx status '{}'",
                other
            ))),
        }
    }
}

/// Status record: state, human message and last update (block time, unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: CctxStatus,
    pub status_message: String,
    pub last_update_timestamp: i64,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            status: CctxStatus::PendingInbound,
            status_message: String::new(),
            last_update_timestamp: 0,
        }
    }
}

// ============================================================================
// PARAMS
// ============================================================================

/// Kind of asset moved by a CCTX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinType {
    /// Native token of the ledger itself
    Zeta,
    /// Native gas token of the external chain
    #[default]
    Gas,
    /// Fungible token contract on the external chain
    Erc20,
    /// Administrative command, no value transfer
    Cmd,
}

/// Parameters observed on the source chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InboundParams {
    pub sender: String,
    pub sender_chain_id: i64,
    pub tx_origin: String,
    pub coin_type: CoinType,
    pub asset: String,
    pub amount: u128,
    pub inbound_tx_observed_hash: String,
    pub inbound_tx_observed_external_height: u64,
    pub inbound_tx_ballot_index: String,
    pub inbound_tx_finalized_height: i64,
}

/// One outbound attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutboundParams {
    pub receiver: String,
    pub receiver_chain_id: i64,
    pub coin_type: CoinType,
    pub amount: u128,
    pub out_tx_tss_nonce: u64,
    pub out_tx_gas_limit: u64,
    /// Unsigned integer encoded as a decimal string
    pub out_tx_gas_price: String,
    pub out_tx_ballot_index: String,
    pub out_tx_observed_hash: String,
    pub out_tx_observed_external_height: u64,
    pub out_tx_gas_used: u64,
    pub out_tx_effective_gas_price: u128,
    pub out_tx_effective_gas_limit: u64,
    pub tss_pubkey: String,
}

// ============================================================================
// CROSS-CHAIN TRANSACTION
// ============================================================================

/// The unit of work tracked end to end by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrossChainTx {
    pub creator: String,
    /// Content-derived identifier, equal to the inbound ballot digest
    pub index: String,
    pub relayed_message: String,
    pub cctx_status: Status,
    pub inbound_tx_params: InboundParams,
    pub outbound_tx_params: Vec<OutboundParams>,
}

impl CrossChainTx {
    /// Returns the outbound attempt currently in flight, if any.
    pub fn current_outbound(&self) -> Option<&OutboundParams> {
        self.outbound_tx_params.last()
    }

    /// Returns the current outbound attempt or a default record when none exists.
    pub fn current_outbound_or_default(&self) -> OutboundParams {
        self.current_outbound().cloned().unwrap_or_default()
    }

    pub fn current_outbound_mut(&mut self) -> Option<&mut OutboundParams> {
        self.outbound_tx_params.last_mut()
    }

    /// Chain targeted by the first outbound, or -1 when no outbound exists.
    pub fn original_destination_chain_id(&self) -> i64 {
        self.outbound_tx_params
            .first()
            .map(|p| p.receiver_chain_id)
            .unwrap_or(-1)
    }

    /// True when the current outbound is the revert leg.
    pub fn is_current_outbound_revert(&self) -> bool {
        self.outbound_tx_params.len() >= MAX_OUTBOUND_PARAMS
    }

    /// Appends the revert leg targeting the original sender on its own chain.
    ///
    /// # Arguments
    ///
    /// * `gas_limit` - Gas limit carried over to the revert outbound
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Revert leg appended
    /// * `Err(CrosschainError::OutboundParamsFull)` - A revert already exists
    pub fn add_revert_outbound(&mut self, gas_limit: u64) -> Result<(), CrosschainError> {
        if self.outbound_tx_params.len() >= MAX_OUTBOUND_PARAMS {
            return Err(CrosschainError::OutboundParamsFull(self.index.clone()));
        }
        let amount = self
            .current_outbound()
            .map(|p| p.amount)
            .unwrap_or(self.inbound_tx_params.amount);
        self.outbound_tx_params.push(OutboundParams {
            receiver: self.inbound_tx_params.sender.clone(),
            receiver_chain_id: self.inbound_tx_params.sender_chain_id,
            coin_type: self.inbound_tx_params.coin_type,
            amount,
            out_tx_gas_limit: gas_limit,
            ..Default::default()
        });
        Ok(())
    }

    /// Moves the CCTX to `next`, stamping the message and block timestamp.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Transition accepted
    /// * `Err(CrosschainError::InvalidStatusTransition)` - Transition not allowed
    pub fn change_status(
        &mut self,
        next: CctxStatus,
        message: impl Into<String>,
        timestamp: i64,
    ) -> Result<(), CrosschainError> {
        let current = self.cctx_status.status;
        if !current.can_transition_to(next) {
            return Err(CrosschainError::InvalidStatusTransition {
                from: current,
                to: next,
            });
        }
        self.cctx_status.status = next;
        self.cctx_status.status_message = message.into();
        self.cctx_status.last_update_timestamp = timestamp;
        Ok(())
    }
}
