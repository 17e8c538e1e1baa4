//! Error types
//!
//! Every rejected operation leaves the store untouched. Errors are grouped by
//! `ErrorKind` so callers can tell an ordinary missing precondition apart from
//! an invariant violation.

use thiserror::Error;

use crate::types::CctxStatus;

/// Broad class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unauthorized signer or creator; resubmit from an authorized party
    Permission,
    /// Missing record or unmet precondition; retry once it is met
    Precondition,
    /// Broken invariant; indicates a bug or manipulation
    Invariant,
    /// Reserve or balance too small; deferred to a later attempt
    ResourceExhausted,
    /// Malformed request from a client
    InvalidRequest,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrosschainError {
    #[error("signer {0} is not authorized")]
    NotAuthorized(String),

    #[error("not enough permissions: {0}")]
    NotEnoughPermissions(String),

    #[error("voter {0} has already voted on this ballot")]
    AlreadyVoted(String),

    #[error("voter {0} is not eligible to vote on this ballot")]
    NotEligible(String),

    #[error("ballot {0} not found")]
    BallotNotFound(String),

    #[error("chain nonces not found for chain {0}")]
    ChainNotFound(String),

    #[error("chain {0} is not supported")]
    UnsupportedChain(i64),

    #[error("pending nonces not found for chain {chain_id} and tss {tss}")]
    PendingRangeNotFound { chain_id: i64, tss: String },

    #[error("nonce mismatch: chain nonce {chain_nonce} != pending nonce high {nonce_high}")]
    NonceMismatch { chain_nonce: u64, nonce_high: u64 },

    #[error("cannot find current tss keys")]
    CannotFindTssKeys,

    #[error("cctx {0} not found")]
    CctxNotFound(String),

    #[error("cctx {0} has no outbound in flight")]
    CctxNotPending(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: CctxStatus, to: CctxStatus },

    #[error("cctx {0} already carries a revert outbound")]
    OutboundParamsFull(String),

    #[error("outbound mismatch: cctx expects chain {expected_chain} nonce {expected_nonce}, vote is for chain {chain} nonce {nonce}")]
    OutboundMismatch {
        expected_chain: i64,
        expected_nonce: u64,
        chain: i64,
        nonce: u64,
    },

    #[error("unable to get median gas price for chain {0}")]
    UnableToGetGasPrice(i64),

    #[error("not enough funds in gas stability pool for chain {chain_id}: required {required}, available {available}")]
    NotEnoughFunds {
        chain_id: i64,
        required: u128,
        available: u128,
    },

    #[error("gas price arithmetic overflow: {0}")]
    GasPriceOverflow(String),

    #[error("invalid gas price '{0}'")]
    InvalidGasPrice(String),

    #[error("invalid gas usage: gas limit {gas_limit} is lower than gas used {gas_used}")]
    InvalidGasUsage { gas_limit: u64, gas_used: u64 },

    #[error("keygen not found")]
    KeygenNotFound,

    #[error("keygen already completed")]
    KeygenCompleted,

    #[error("tss pubkey {0} was never generated")]
    TssNotGenerated(String),

    #[error("foreign coin not found for chain {chain_id} asset '{asset}'")]
    ForeignCoinNotFound { chain_id: i64, asset: String },

    #[error("invalid coin type for refund: {0}")]
    InvalidCoinType(String),

    #[error("invalid chain {0} for refund")]
    InvalidChain(i64),

    #[error("invalid sender for refund")]
    InvalidSender,

    #[error("invalid amount for refund")]
    InvalidAmount,

    #[error("max tx out tracker hashes reached for chain {chain_id} nonce {nonce}")]
    MaxTxOutTrackerHashesReached { chain_id: i64, nonce: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CrosschainError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        use CrosschainError::*;
        match self {
            NotAuthorized(_) | NotEnoughPermissions(_) => ErrorKind::Permission,
            AlreadyVoted(_) | NotEligible(_) => ErrorKind::Permission,
            NonceMismatch { .. }
            | InvalidStatusTransition { .. }
            | OutboundParamsFull(_)
            | GasPriceOverflow(_)
            | InvalidGasUsage { .. } => ErrorKind::Invariant,
            NotEnoughFunds { .. } => ErrorKind::ResourceExhausted,
            InvalidRequest(_) => ErrorKind::InvalidRequest,
            _ => ErrorKind::Precondition,
        }
    }

    /// True for a missing record (as opposed to an unmet condition on an existing one).
    pub fn is_not_found(&self) -> bool {
        use CrosschainError::*;
        matches!(
            self,
            NotFound(_)
                | CctxNotFound(_)
                | BallotNotFound(_)
                | ChainNotFound(_)
                | PendingRangeNotFound { .. }
                | KeygenNotFound
                | CannotFindTssKeys
                | ForeignCoinNotFound { .. }
                | UnsupportedChain(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CrosschainError>;
