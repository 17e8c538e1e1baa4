//! Crosschain State Machine Library
//!
//! Replicated side of the cross-chain transfer protocol: observers vote on
//! events seen on external chains, ballots finalize those votes, and each
//! finalized inbound becomes a cross-chain transaction (CCTX) that is given
//! an outbound nonce, a gas price, and a lifecycle that ends mined, reverted
//! or aborted.
//!
//! The keeper is deterministic; the node and API around it are not part of
//! the replicated computation.

pub mod api;
pub mod config;
pub mod error;
pub mod keeper;
pub mod msg;
pub mod node;
pub mod store;
pub mod types;

pub use config::{ApiConfig, Config, GenesisConfig, NodeConfig};
pub use error::{CrosschainError, ErrorKind};
pub use keeper::{BlockContext, Keeper, PageRequest, PageResponse};
pub use msg::{Msg, MsgResponse};
pub use node::{BlockSummary, Node, NodeHandle};
pub use store::Store;
