//! Record types owned by the state machine store

pub mod ballot;
pub mod cctx;
pub mod chain;
pub mod event;
pub mod flags;
pub mod fungible;
pub mod gas;
pub mod nonce;
pub mod tracker;
pub mod tss;

pub use ballot::{Ballot, BallotStatus, BallotThreshold, ObservationType, VoteType};
pub use cctx::{CctxStatus, CoinType, CrossChainTx, InboundParams, OutboundParams, Status};
pub use chain::{Chain, ChainKind};
pub use event::Event;
pub use flags::{CrosschainFlags, GasPriceIncreaseFlags};
pub use fungible::ForeignCoin;
pub use gas::GasPrice;
pub use nonce::{ChainNonces, PendingNonces};
pub use tracker::{OutTxTracker, TxHashEntry, MAX_OUT_TX_TRACKER_HASHES};
pub use tss::{Blame, BlameNode, Keygen, KeygenStatus, NodeAccount, Tss};
