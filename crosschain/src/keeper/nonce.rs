//! Nonce Allocator
//!
//! Hands out per-chain, per-signing-key outbound nonces. Every successful
//! assignment bumps `ChainNonces.nonce` and `PendingNonces.nonce_high`
//! together, so the two counters can never diverge under correct operation.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: A divergence between the two counters is reported as
//! `NonceMismatch` and never repaired here. Proceeding would risk handing the
//! same nonce to two CCTXs or skipping one.

use tracing::{debug, error};

use super::Keeper;
use crate::error::{CrosschainError, Result};
use crate::types::{ChainNonces, CrossChainTx, Event, PendingNonces};

impl Keeper {
    /// Assigns the next outbound nonce for `chain_id` under `signing_key`.
    ///
    /// All preconditions are checked before any counter is written.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - Destination chain
    /// * `signing_key` - TSS pubkey that will sign the outbound
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - The assigned nonce
    /// * `Err(CrosschainError::ChainNotFound)` - No nonce counter for the chain
    /// * `Err(CrosschainError::PendingRangeNotFound)` - No pending window for (key, chain)
    /// * `Err(CrosschainError::NonceMismatch)` - Counters diverged
    pub fn assign_nonce(&mut self, chain_id: i64, signing_key: &str) -> Result<u64> {
        let chain_name = self
            .store()
            .get_chain(chain_id)
            .map(|c| c.chain_name.clone())
            .ok_or_else(|| CrosschainError::ChainNotFound(chain_id.to_string()))?;
        let mut chain_nonces = self
            .store()
            .get_chain_nonces(&chain_name)
            .cloned()
            .ok_or_else(|| CrosschainError::ChainNotFound(chain_name.clone()))?;
        let mut pending = self
            .store()
            .get_pending_nonces(signing_key, chain_id)
            .cloned()
            .ok_or_else(|| CrosschainError::PendingRangeNotFound {
                chain_id,
                tss: signing_key.to_string(),
            })?;

        if pending.nonce_high != chain_nonces.nonce {
            error!(
                "Nonce mismatch on chain {}: chain nonce {} != pending nonce high {}",
                chain_id, chain_nonces.nonce, pending.nonce_high
            );
            return Err(CrosschainError::NonceMismatch {
                chain_nonce: chain_nonces.nonce,
                nonce_high: pending.nonce_high,
            });
        }

        let nonce = chain_nonces.nonce;
        chain_nonces.nonce += 1;
        pending.nonce_high += 1;
        self.store_mut().set_chain_nonces(chain_nonces);
        self.store_mut().set_pending_nonces(pending);
        self.emit(Event::NonceAssigned {
            chain_id,
            tss: signing_key.to_string(),
            nonce,
        });
        debug!("Assigned nonce {} on chain {}", nonce, chain_id);
        Ok(nonce)
    }

    /// Assigns a nonce to the CCTX's current outbound under the current TSS.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Nonce written into the current outbound
    /// * `Err(CrosschainError)` - No current TSS, no outbound, or allocation failed
    pub fn update_nonce(&mut self, chain_id: i64, cctx: &mut CrossChainTx) -> Result<u64> {
        let tss_pubkey = self
            .store()
            .get_tss()
            .map(|t| t.tss_pubkey.clone())
            .ok_or(CrosschainError::CannotFindTssKeys)?;
        if cctx.current_outbound().is_none() {
            return Err(CrosschainError::CctxNotPending(cctx.index.clone()));
        }
        let nonce = self.assign_nonce(chain_id, &tss_pubkey)?;
        if let Some(outbound) = cctx.current_outbound_mut() {
            outbound.out_tx_tss_nonce = nonce;
            outbound.tss_pubkey = tss_pubkey;
        }
        Ok(nonce)
    }

    /// Moves `nonce_low` past a confirmed nonce when it lies in the pending window.
    pub fn remove_from_pending_nonces(&mut self, tss: &str, chain_id: i64, nonce: u64) {
        if let Some(mut pending) = self.store().get_pending_nonces(tss, chain_id).cloned() {
            if pending.contains(nonce) {
                pending.nonce_low = nonce + 1;
                self.store_mut().set_pending_nonces(pending);
            }
        }
    }

    /// Opens an empty pending window for `tss` on every supported chain.
    ///
    /// Chains without a nonce counter start at 0.
    pub fn init_pending_nonces_for_tss(&mut self, tss: &str) {
        for chain in self.store().supported_chains() {
            let chain_nonces = match self.store().get_chain_nonces(&chain.chain_name) {
                Some(n) => n.clone(),
                None => {
                    let fresh = ChainNonces {
                        chain_name: chain.chain_name.clone(),
                        chain_id: chain.chain_id,
                        nonce: 0,
                    };
                    self.store_mut().set_chain_nonces(fresh.clone());
                    fresh
                }
            };
            self.store_mut().set_pending_nonces(PendingNonces {
                tss: tss.to_string(),
                chain_id: chain.chain_id,
                nonce_low: chain_nonces.nonce,
                nonce_high: chain_nonces.nonce,
            });
        }
    }
}
