//! Ballot Engine
//!
//! Tallies observer votes into a quorum decision. Finalization and its
//! consequence run in the same transition as the finalizing vote.

use std::collections::BTreeMap;

use tracing::info;

use super::{BlockContext, Keeper};
use crate::error::{CrosschainError, Result};
use crate::types::{Ballot, BallotThreshold, Event, ObservationType, VoteType};

impl Keeper {
    /// Returns the ballot for `identifier`, creating it when first seen.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Block metadata (creation height)
    /// * `identifier` - Digest of the claim being voted on
    /// * `voter_list` - Eligible voters, used only when the ballot is created
    /// * `observation_type` - What the ballot is about
    /// * `threshold` - Fraction of `voter_list` that must agree
    ///
    /// # Returns
    ///
    /// * `(Ballot, bool)` - The ballot and whether it was just created
    pub fn find_or_create_ballot(
        &mut self,
        ctx: &BlockContext,
        identifier: &str,
        voter_list: Vec<String>,
        observation_type: ObservationType,
        threshold: BallotThreshold,
    ) -> (Ballot, bool) {
        if let Some(ballot) = self.store().get_ballot(identifier) {
            return (ballot.clone(), false);
        }
        let ballot = Ballot::new(identifier, voter_list, observation_type, threshold, ctx.height);
        self.store_mut().set_ballot(ballot.clone());
        self.emit(Event::BallotCreated {
            ballot_identifier: identifier.to_string(),
            observation_type,
        });
        (ballot, true)
    }

    /// Records `voter`'s vote and persists the ballot.
    ///
    /// # Returns
    ///
    /// * `Ok(Ballot)` - Updated ballot
    /// * `Err(CrosschainError::AlreadyVoted | NotEligible)` - Vote rejected
    pub fn add_vote(&mut self, mut ballot: Ballot, voter: &str, vote: VoteType) -> Result<Ballot> {
        if vote == VoteType::NotYetVoted {
            return Err(CrosschainError::InvalidRequest(
                "vote must be a success or failure observation".to_string(),
            ));
        }
        ballot.add_vote(voter, vote)?;
        self.store_mut().set_ballot(ballot.clone());
        Ok(ballot)
    }

    /// Applies the finalization rule and persists the outcome.
    ///
    /// # Returns
    ///
    /// * `(Ballot, true)` - This call finalized the ballot
    /// * `(Ballot, false)` - Still in progress, or finalized earlier
    pub fn check_finalization(&mut self, mut ballot: Ballot) -> (Ballot, bool) {
        let finalized = ballot.check_finalization();
        if finalized {
            info!(
                "Ballot {} finalized with status {:?}",
                ballot.ballot_identifier, ballot.ballot_status
            );
            self.store_mut().set_ballot(ballot.clone());
            self.emit(Event::BallotFinalized {
                ballot_identifier: ballot.ballot_identifier.clone(),
                status: ballot.ballot_status,
            });
        }
        (ballot, finalized)
    }

    /// Convenience: find or create, vote, then check finalization.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn vote_on_ballot(
        &mut self,
        ctx: &BlockContext,
        identifier: &str,
        voter_list: Vec<String>,
        observation_type: ObservationType,
        threshold: BallotThreshold,
        voter: &str,
        vote: VoteType,
    ) -> Result<(Ballot, bool)> {
        let (ballot, _) =
            self.find_or_create_ballot(ctx, identifier, voter_list, observation_type, threshold);
        let ballot = self.add_vote(ballot, voter, vote)?;
        Ok(self.check_finalization(ballot))
    }

    /// Accumulates reward units over matured ballots.
    ///
    /// Missing ballots are skipped. The result is keyed and iterated in
    /// sorted voter order.
    ///
    /// # Returns
    ///
    /// * `(BTreeMap<String, i64>, i64)` - Units per voter and total positive units
    pub fn tally_matured_ballots(&self, identifiers: &[String]) -> (BTreeMap<String, i64>, i64) {
        let mut distribution = BTreeMap::new();
        let mut total = 0;
        for identifier in identifiers {
            if let Some(ballot) = self.store().get_ballot(identifier) {
                total += ballot.build_rewards_distribution(&mut distribution);
            }
        }
        (distribution, total)
    }
}
