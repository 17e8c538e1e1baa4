//! Vote Submission Messages
//!
//! Messages submitted by observers and the admin. Vote messages derive their
//! ballot identifier from the claim alone: the creator is cleared, the claim
//! is BCS-encoded (length-prefixed, field-ordered) and hashed with keccak256.
//! Two distinct claims can therefore never share a ballot through field
//! reordering or padding, and every observer of the same event lands on the
//! same ballot.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::{CrosschainError, Result};
use crate::types::{Blame, CoinType, CrosschainFlags, VoteType};

// ============================================================================
// DIGEST
// ============================================================================

/// Computes `0x`-prefixed keccak256 over the BCS encoding of `claim`.
pub fn claim_digest<T: Serialize>(claim: &T) -> Result<String> {
    let bytes = bcs::to_bytes(claim)
        .map_err(|e| CrosschainError::InvalidRequest(format!("failed to encode claim: {}", e)))?;
    let hash = Keccak256::digest(&bytes);
    Ok(format!("0x{}", hex::encode(hash)))
}

/// Observed outcome on an external chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveStatus {
    Created,
    Success,
    Failed,
}

impl ReceiveStatus {
    pub fn to_vote_type(self) -> VoteType {
        match self {
            ReceiveStatus::Success => VoteType::SuccessObservation,
            ReceiveStatus::Failed => VoteType::FailureObservation,
            ReceiveStatus::Created => VoteType::NotYetVoted,
        }
    }
}

// ============================================================================
// OBSERVER MESSAGES
// ============================================================================

/// Vote that an inbound transfer was observed on a source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgVoteOnObservedInboundTx {
    pub creator: String,
    pub sender: String,
    pub sender_chain_id: i64,
    pub tx_origin: String,
    pub receiver: String,
    pub receiver_chain: i64,
    pub amount: u128,
    #[serde(default)]
    pub message: String,
    pub in_tx_hash: String,
    pub in_block_height: u64,
    pub gas_limit: u64,
    pub coin_type: CoinType,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub event_index: u64,
}

impl MsgVoteOnObservedInboundTx {
    pub fn digest(&self) -> Result<String> {
        let mut claim = self.clone();
        claim.creator.clear();
        claim_digest(&claim)
    }
}

/// Vote that the in-flight outbound of a CCTX was observed on its target chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgVoteOnObservedOutboundTx {
    pub creator: String,
    pub cctx_hash: String,
    pub observed_outtx_hash: String,
    pub observed_outtx_block_height: u64,
    pub observed_outtx_gas_used: u64,
    pub observed_outtx_effective_gas_price: u128,
    pub observed_outtx_effective_gas_limit: u64,
    pub value_received: u128,
    pub status: ReceiveStatus,
    pub outtx_chain: i64,
    pub outtx_tss_nonce: u64,
    pub coin_type: CoinType,
}

impl MsgVoteOnObservedOutboundTx {
    pub fn digest(&self) -> Result<String> {
        let mut claim = self.clone();
        claim.creator.clear();
        claim_digest(&claim)
    }
}

/// Vote on the result of a key-generation ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateTssVoter {
    pub creator: String,
    pub tss_pubkey: String,
    pub keygen_height: i64,
    pub status: ReceiveStatus,
}

impl MsgCreateTssVoter {
    pub fn digest(&self) -> Result<String> {
        claim_digest(&(self.tss_pubkey.as_str(), self.keygen_height, self.status))
    }
}

/// Observed gas price on an external chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgGasPriceVoter {
    pub creator: String,
    pub chain_id: i64,
    pub price: u128,
    pub block_number: u64,
}

/// Report of a broadcast hash for an expected (chain, nonce) outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAddToOutTxTracker {
    pub creator: String,
    pub chain_id: i64,
    pub nonce: u64,
    pub tx_hash: String,
    #[serde(default)]
    pub proof: Option<String>,
    #[serde(default)]
    pub blame_index: Option<String>,
    #[serde(default)]
    pub vote_index: Option<String>,
}

/// Vote on a signing-round misbehaviour report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAddBlameVote {
    pub creator: String,
    pub chain_id: i64,
    pub blame_info: Blame,
}

impl MsgAddBlameVote {
    pub fn digest(&self) -> Result<String> {
        claim_digest(&(self.chain_id, &self.blame_info))
    }
}

// ============================================================================
// ADMIN MESSAGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUpdateTssAddress {
    pub creator: String,
    pub tss_pubkey: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUpdateCrosschainFlags {
    pub creator: String,
    pub flags: CrosschainFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRemoveFromOutTxTracker {
    pub creator: String,
    pub chain_id: i64,
    pub nonce: u64,
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// Any message accepted by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Msg {
    VoteOnObservedInboundTx(MsgVoteOnObservedInboundTx),
    VoteOnObservedOutboundTx(MsgVoteOnObservedOutboundTx),
    CreateTssVoter(MsgCreateTssVoter),
    GasPriceVoter(MsgGasPriceVoter),
    AddToOutTxTracker(MsgAddToOutTxTracker),
    RemoveFromOutTxTracker(MsgRemoveFromOutTxTracker),
    AddBlameVote(MsgAddBlameVote),
    UpdateTssAddress(MsgUpdateTssAddress),
    UpdateCrosschainFlags(MsgUpdateCrosschainFlags),
}

impl Msg {
    pub fn creator(&self) -> &str {
        match self {
            Msg::VoteOnObservedInboundTx(m) => &m.creator,
            Msg::VoteOnObservedOutboundTx(m) => &m.creator,
            Msg::CreateTssVoter(m) => &m.creator,
            Msg::GasPriceVoter(m) => &m.creator,
            Msg::AddToOutTxTracker(m) => &m.creator,
            Msg::RemoveFromOutTxTracker(m) => &m.creator,
            Msg::AddBlameVote(m) => &m.creator,
            Msg::UpdateTssAddress(m) => &m.creator,
            Msg::UpdateCrosschainFlags(m) => &m.creator,
        }
    }
}

/// Result of delivering a message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MsgResponse {
    /// Ballot the vote was recorded on, for vote messages
    pub ballot_identifier: Option<String>,
    /// True when this message finalized its ballot
    pub finalized: bool,
    /// CCTX created or advanced by this message
    pub cctx_index: Option<String>,
}
