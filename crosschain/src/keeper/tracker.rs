//! Outbound tracker: broadcast hashes reported against expected (chain, nonce) outbounds.

use tracing::{debug, info};

use super::Keeper;
use crate::error::{CrosschainError, Result};
use crate::msg::{MsgAddToOutTxTracker, MsgRemoveFromOutTxTracker};
use crate::types::{OutTxTracker, TxHashEntry, MAX_OUT_TX_TRACKER_HASHES};

impl Keeper {
    /// Records a broadcast hash for (chain, nonce).
    ///
    /// Duplicate hashes from several observers are accepted without change.
    /// When the outbound at (chain, nonce) is already finalized, or is no
    /// longer the CCTX's current outbound, the tracker is dropped instead.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Hash recorded, duplicate ignored, or tracker dropped
    /// * `Err(CrosschainError::NotAuthorized)` - Creator is neither observer nor admin
    /// * `Err(CrosschainError::MaxTxOutTrackerHashesReached)` - Too many distinct hashes
    pub fn add_to_out_tx_tracker(&mut self, msg: &MsgAddToOutTxTracker) -> Result<()> {
        if !(self.is_authorized_observer(&msg.creator, msg.chain_id) || self.is_admin(&msg.creator)) {
            return Err(CrosschainError::NotAuthorized(msg.creator.clone()));
        }
        if msg.tx_hash.is_empty() {
            return Err(CrosschainError::InvalidRequest("empty tx hash".to_string()));
        }

        if let Some(tss) = self.store().get_tss().map(|t| t.tss_pubkey.clone()) {
            // a reverting cctx stays indexed under its failed forward leg
            let finalized = self
                .store()
                .get_cctx_by_nonce(&tss, msg.chain_id, msg.nonce)
                .map(|c| {
                    let current = c.current_outbound_or_default();
                    !(c.cctx_status.status.is_pending_outbound()
                        && current.receiver_chain_id == msg.chain_id
                        && current.out_tx_tss_nonce == msg.nonce)
                })
                .unwrap_or(false);
            if finalized {
                debug!(
                    "Outbound {}-{} already finalized, dropping tracker",
                    msg.chain_id, msg.nonce
                );
                self.store_mut().remove_out_tx_tracker(msg.chain_id, msg.nonce);
                return Ok(());
            }
        }

        let entry = TxHashEntry {
            tx_hash: msg.tx_hash.clone(),
            tx_signer: msg.creator.clone(),
            proved: false,
        };
        let mut tracker = match self.store().get_out_tx_tracker(msg.chain_id, msg.nonce) {
            Some(t) => t.clone(),
            None => OutTxTracker {
                index: OutTxTracker::index_for(msg.chain_id, msg.nonce),
                chain_id: msg.chain_id,
                nonce: msg.nonce,
                hash_list: Vec::new(),
            },
        };
        if tracker.contains_hash(&msg.tx_hash) {
            return Ok(());
        }
        if tracker.hash_list.len() >= MAX_OUT_TX_TRACKER_HASHES {
            return Err(CrosschainError::MaxTxOutTrackerHashesReached {
                chain_id: msg.chain_id,
                nonce: msg.nonce,
            });
        }
        tracker.hash_list.push(entry);
        info!(
            "Outbound tracker {}: added hash {} from {}",
            tracker.index, msg.tx_hash, msg.creator
        );
        self.store_mut().set_out_tx_tracker(tracker);
        Ok(())
    }

    /// Removes the tracker for (chain, nonce) (admin only).
    pub fn remove_from_out_tx_tracker(&mut self, msg: &MsgRemoveFromOutTxTracker) -> Result<()> {
        self.require_admin(&msg.creator)?;
        self.store_mut().remove_out_tx_tracker(msg.chain_id, msg.nonce);
        Ok(())
    }
}
