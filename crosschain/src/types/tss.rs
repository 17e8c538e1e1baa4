//! Threshold signing key records

use serde::{Deserialize, Serialize};

/// A signing key generated by the observer set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tss {
    pub tss_pubkey: String,
    /// Participant pubkeys holding a share of this key
    pub tss_participant_list: Vec<String>,
    /// Operator accounts that voted the key in
    pub operator_address_list: Vec<String>,
    pub finalized_height: i64,
    pub keygen_height: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeygenStatus {
    Pending,
    Success,
    Failed,
}

/// Key-generation ceremony scheduled by the admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keygen {
    pub status: KeygenStatus,
    /// Participant pubkeys expected to take part
    pub granted_pubkeys: Vec<String>,
    pub block_number: i64,
}

/// Operator account of an observer node and the pubkey it signs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAccount {
    pub operator: String,
    pub granted_pubkey: String,
}

/// One participant blamed for a failed signing round.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlameNode {
    pub pubkey: String,
    #[serde(default)]
    pub blame_data: Vec<u8>,
    #[serde(default)]
    pub blame_signature: Vec<u8>,
}

/// Misbehaviour report for one signing round.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Blame {
    /// `{chain}-{nonce}-{digest}-{height}`
    pub index: String,
    pub failure_reason: String,
    pub nodes: Vec<BlameNode>,
}
