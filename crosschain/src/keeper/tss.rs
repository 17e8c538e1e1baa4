//! TSS bookkeeping: keygen votes, key rotation and blame records.

use tracing::{info, warn};

use super::{BlockContext, Keeper};
use crate::error::{CrosschainError, Result};
use crate::msg::{MsgAddBlameVote, MsgCreateTssVoter, MsgResponse, MsgUpdateTssAddress};
use crate::types::{BallotStatus, BallotThreshold, Event, KeygenStatus, ObservationType, Tss};

impl Keeper {
    /// True when `address` has a node account.
    pub fn is_authorized_node_account(&self, address: &str) -> bool {
        self.store().get_node_account(address).is_some()
    }

    /// Records a keygen vote; on unanimous success the new key enters TSS history.
    ///
    /// The key also becomes current when no TSS exists yet. On a finalized
    /// failure the keygen is marked failed with block number `i64::MAX`.
    ///
    /// # Returns
    ///
    /// * `Ok(MsgResponse)` - Vote recorded
    /// * `Err(CrosschainError::NotAuthorized)` - Creator has no node account
    /// * `Err(CrosschainError::KeygenNotFound)` - No keygen scheduled
    /// * `Err(CrosschainError::KeygenCompleted)` - Keygen already succeeded
    pub fn create_tss_voter(&mut self, ctx: &BlockContext, msg: &MsgCreateTssVoter) -> Result<MsgResponse> {
        if !self.is_authorized_node_account(&msg.creator) {
            return Err(CrosschainError::NotAuthorized(msg.creator.clone()));
        }
        let mut keygen = self
            .store()
            .get_keygen()
            .cloned()
            .ok_or(CrosschainError::KeygenNotFound)?;
        if keygen.status == KeygenStatus::Success {
            return Err(CrosschainError::KeygenCompleted);
        }

        let index = msg.digest()?;
        let voters: Vec<String> = self
            .store()
            .all_node_accounts()
            .into_iter()
            .map(|a| a.operator)
            .collect();
        let (ballot, finalized) = self.vote_on_ballot(
            ctx,
            &index,
            voters,
            ObservationType::TssKeygen,
            BallotThreshold::UNANIMOUS,
            &msg.creator,
            msg.status.to_vote_type(),
        )?;
        let response = MsgResponse {
            ballot_identifier: Some(index.clone()),
            finalized,
            cctx_index: None,
        };
        if !finalized {
            return Ok(response);
        }

        if ballot.ballot_status == BallotStatus::FinalizedFailure {
            warn!("Keygen at height {} failed", msg.keygen_height);
            keygen.status = KeygenStatus::Failed;
            keygen.block_number = i64::MAX;
            self.store_mut().set_keygen(keygen);
            self.emit(Event::KeygenFailed {
                ballot_identifier: index,
            });
            return Ok(response);
        }

        let tss = Tss {
            tss_pubkey: msg.tss_pubkey.clone(),
            tss_participant_list: keygen.granted_pubkeys.clone(),
            operator_address_list: ballot.voter_list.clone(),
            finalized_height: ctx.height,
            keygen_height: msg.keygen_height,
        };
        if self.store().all_tss_history().is_empty() {
            self.set_tss_and_update_nonce(tss.clone());
        }
        self.store_mut().set_tss_history(tss);
        keygen.status = KeygenStatus::Success;
        keygen.block_number = ctx.height;
        self.store_mut().set_keygen(keygen);
        info!("TSS {} generated at height {}", msg.tss_pubkey, ctx.height);
        self.emit(Event::TssCreated {
            tss_pubkey: msg.tss_pubkey.clone(),
        });
        Ok(response)
    }

    /// Makes `tss` current and opens its pending nonce windows.
    pub fn set_tss_and_update_nonce(&mut self, tss: Tss) {
        self.init_pending_nonces_for_tss(&tss.tss_pubkey);
        self.store_mut().set_tss(tss);
    }

    /// Switches the current TSS to a previously generated key (admin only).
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Key is now current
    /// * `Err(CrosschainError::NotAuthorized)` - Creator is not the admin
    /// * `Err(CrosschainError::TssNotGenerated)` - Pubkey is not in TSS history
    pub fn update_tss_address(&mut self, msg: &MsgUpdateTssAddress) -> Result<()> {
        self.require_admin(&msg.creator)?;
        let tss = self
            .store()
            .get_tss_history(&msg.tss_pubkey)
            .cloned()
            .ok_or_else(|| CrosschainError::TssNotGenerated(msg.tss_pubkey.clone()))?;
        info!("Current TSS switched to {}", tss.tss_pubkey);
        self.set_tss_and_update_nonce(tss);
        Ok(())
    }

    /// Records a blame vote; the blame is stored once the ballot finalizes with success.
    pub fn add_blame_vote(&mut self, ctx: &BlockContext, msg: &MsgAddBlameVote) -> Result<MsgResponse> {
        if !self.is_authorized_observer(&msg.creator, msg.chain_id) {
            return Err(CrosschainError::NotAuthorized(msg.creator.clone()));
        }
        let index = msg.digest()?;
        let voters = self.store().observers().to_vec();
        let threshold = self.store().params().ballot_threshold;
        let (ballot, finalized) = self.vote_on_ballot(
            ctx,
            &index,
            voters,
            ObservationType::TssKeysign,
            threshold,
            &msg.creator,
            crate::types::VoteType::SuccessObservation,
        )?;
        if finalized && ballot.ballot_status == BallotStatus::FinalizedSuccess {
            info!("Blame {} recorded for chain {}", msg.blame_info.index, msg.chain_id);
            self.store_mut().set_blame(msg.blame_info.clone());
            self.emit(Event::BlameRecorded {
                index: msg.blame_info.index.clone(),
            });
        }
        Ok(MsgResponse {
            ballot_identifier: Some(index),
            finalized,
            cctx_index: None,
        })
    }
}
