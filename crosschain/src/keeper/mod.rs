//! Keeper Module
//!
//! The keeper owns the replicated store and implements every state
//! transition: ballots, nonce allocation, the CCTX lifecycle, gas price
//! escalation, TSS bookkeeping, outbound trackers and queries.
//!
//! ## Determinism Requirements
//!
//! **CRITICAL**: Every transition is a pure function of (store, message,
//! block context). No wall-clock reads, no randomness, no network calls, and
//! all iteration goes through ordered maps. Violating this splits replicas.

use tracing::{debug, info, warn};

use crate::error::{CrosschainError, Result};
use crate::msg::{Msg, MsgResponse};
use crate::store::Store;
use crate::types::Event;

pub mod ballot;
pub mod cctx;
pub mod gas;
pub mod nonce;
pub mod query;
pub mod tracker;
pub mod tss;

pub use query::{PageRequest, PageResponse};

/// Block metadata handed to every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub height: i64,
    /// Block time in unix seconds
    pub timestamp: i64,
}

/// State machine over the replicated store.
#[derive(Debug, Clone)]
pub struct Keeper {
    store: Store,
    events: Vec<Event>,
}

impl Keeper {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            events: Vec::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Events emitted since the last `take_events`.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, event: Event) {
        debug!("event: {:?}", event);
        self.events.push(event);
    }

    /// Runs `f` against the keeper and discards every change it made if it fails.
    ///
    /// Calls nest. Only the keys `f` writes are journaled, so the cost does
    /// not grow with the size of the store.
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - `f` succeeded; its writes and events are kept
    /// * `Err(CrosschainError)` - `f` failed; store and events are restored
    pub fn with_cache<T>(&mut self, f: impl FnOnce(&mut Keeper) -> Result<T>) -> Result<T> {
        let checkpoint = self.store.checkpoint();
        let events = self.events.len();
        match f(self) {
            Ok(value) => {
                self.store.commit(checkpoint);
                Ok(value)
            }
            Err(e) => {
                self.store.rollback(checkpoint);
                self.events.truncate(events);
                Err(e)
            }
        }
    }

    // ========================================================================
    // MESSAGE DISPATCH
    // ========================================================================

    /// Applies one submitted message atomically.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Block metadata of the block carrying the message
    /// * `msg` - The message to apply
    ///
    /// # Returns
    ///
    /// * `Ok(MsgResponse)` - Message applied
    /// * `Err(CrosschainError)` - Message rejected, store unchanged
    pub fn deliver(&mut self, ctx: &BlockContext, msg: &Msg) -> Result<MsgResponse> {
        let result = self.with_cache(|k| match msg {
            Msg::VoteOnObservedInboundTx(m) => k.vote_on_observed_inbound_tx(ctx, m),
            Msg::VoteOnObservedOutboundTx(m) => k.vote_on_observed_outbound_tx(ctx, m),
            Msg::CreateTssVoter(m) => k.create_tss_voter(ctx, m),
            Msg::GasPriceVoter(m) => k.gas_price_voter(m).map(|_| MsgResponse::default()),
            Msg::AddToOutTxTracker(m) => k.add_to_out_tx_tracker(m).map(|_| MsgResponse::default()),
            Msg::RemoveFromOutTxTracker(m) => {
                k.remove_from_out_tx_tracker(m).map(|_| MsgResponse::default())
            }
            Msg::AddBlameVote(m) => k.add_blame_vote(ctx, m),
            Msg::UpdateTssAddress(m) => k.update_tss_address(m).map(|_| MsgResponse::default()),
            Msg::UpdateCrosschainFlags(m) => {
                k.update_crosschain_flags(m).map(|_| MsgResponse::default())
            }
        });
        if let Err(ref e) = result {
            log_rejection(msg, e);
        }
        result
    }

    /// Per-block sweep run after all messages of the block.
    ///
    /// # Returns
    ///
    /// Number of CCTXs whose gas price was raised
    pub fn end_block(&mut self, ctx: &BlockContext) -> usize {
        let flags = self.store.flags().clone();
        let updated = self.iterate_and_update_cctx_gas_price(ctx, &flags);
        if updated > 0 {
            info!("Block {}: raised gas price of {} pending cctx", ctx.height, updated);
        }
        updated
    }

    // ========================================================================
    // AUTHORIZATION
    // ========================================================================

    /// True when `address` is in the observer set and `chain_id` is supported.
    pub fn is_authorized_observer(&self, address: &str, chain_id: i64) -> bool {
        self.store.get_chain(chain_id).is_some()
            && self.store.observers().iter().any(|o| o == address)
    }

    pub fn is_admin(&self, address: &str) -> bool {
        !address.is_empty() && self.store.admin() == address
    }

    pub(crate) fn require_admin(&self, address: &str) -> Result<()> {
        if self.is_admin(address) {
            Ok(())
        } else {
            Err(CrosschainError::NotAuthorized(address.to_string()))
        }
    }

    pub(crate) fn update_crosschain_flags(
        &mut self,
        msg: &crate::msg::MsgUpdateCrosschainFlags,
    ) -> Result<()> {
        self.require_admin(&msg.creator)?;
        info!(
            "Crosschain flags updated: inbound_enabled={}, outbound_enabled={}",
            msg.flags.is_inbound_enabled, msg.flags.is_outbound_enabled
        );
        self.store.set_flags(msg.flags.clone());
        Ok(())
    }
}

/// Logs a rejected message; invariant violations are logged distinctly.
fn log_rejection(msg: &Msg, e: &CrosschainError) {
    use crate::error::ErrorKind;
    match e.kind() {
        ErrorKind::Invariant => tracing::error!(
            "INVARIANT VIOLATION rejecting message from {}: {}",
            msg.creator(),
            e
        ),
        ErrorKind::Permission => warn!("Rejected message from {}: {}", msg.creator(), e),
        _ => debug!("Rejected message from {}: {}", msg.creator(), e),
    }
}
