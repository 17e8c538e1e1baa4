//! Events emitted by state transitions

use serde::{Deserialize, Serialize};

use super::ballot::{BallotStatus, ObservationType};
use super::cctx::CctxStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    BallotCreated {
        ballot_identifier: String,
        observation_type: ObservationType,
    },
    BallotFinalized {
        ballot_identifier: String,
        status: BallotStatus,
    },
    CctxCreated {
        index: String,
        status: CctxStatus,
    },
    CctxStatusChanged {
        index: String,
        from: CctxStatus,
        to: CctxStatus,
        message: String,
    },
    NonceAssigned {
        chain_id: i64,
        tss: String,
        nonce: u64,
    },
    GasPriceIncreased {
        index: String,
        gas_price_increase: u128,
        additional_fees: u128,
    },
    RefundIssued {
        index: String,
        receiver: String,
        zrc20: String,
        amount: u128,
    },
    RefundFailed {
        index: String,
        reason: String,
    },
    TssCreated {
        tss_pubkey: String,
    },
    KeygenFailed {
        ballot_identifier: String,
    },
    BlameRecorded {
        index: String,
    },
}
