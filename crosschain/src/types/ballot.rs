//! Ballot records
//!
//! A ballot tallies observer votes for one observable claim. All fraction
//! arithmetic is done on integers (basis points) so every replica computes
//! the same outcome.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CrosschainError;

/// Basis points representing a fraction of 1.00.
pub const THRESHOLD_SCALE: u32 = 10_000;

// ============================================================================
// ENUMS
// ============================================================================

/// Per-voter tri-state vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    NotYetVoted,
    SuccessObservation,
    FailureObservation,
}

/// What the ballot is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    InboundTx,
    OutboundTx,
    TssKeygen,
    TssKeysign,
    GasPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotStatus {
    InProgress,
    FinalizedSuccess,
    FinalizedFailure,
}

impl BallotStatus {
    pub fn is_finalized(self) -> bool {
        !matches!(self, BallotStatus::InProgress)
    }
}

// ============================================================================
// THRESHOLD
// ============================================================================

/// Ballot threshold stored in basis points, written as a decimal ("0.67").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BallotThreshold(u32);

impl BallotThreshold {
    /// Unanimity, used by key-generation ballots.
    pub const UNANIMOUS: BallotThreshold = BallotThreshold(THRESHOLD_SCALE);

    /// Creates a threshold from basis points (10000 = 1.00).
    pub fn from_basis_points(bps: u32) -> Result<Self, CrosschainError> {
        if bps == 0 || bps > THRESHOLD_SCALE {
            return Err(CrosschainError::InvalidRequest(format!(
                "ballot threshold must be in (0, 1.00], got {} basis points",
                bps
            )));
        }
        Ok(Self(bps))
    }

    pub fn basis_points(self) -> u32 {
        self.0
    }

    /// True when `count / total >= threshold`, computed without division.
    pub fn is_reached(self, count: usize, total: usize) -> bool {
        if total == 0 {
            return false;
        }
        (count as u128) * (THRESHOLD_SCALE as u128) >= (self.0 as u128) * (total as u128)
    }
}

impl FromStr for BallotThreshold {
    type Err = CrosschainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CrosschainError::InvalidRequest(format!("invalid ballot threshold '{}'", s));
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if frac.len() > 4 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u32 = whole.parse().map_err(|_| invalid())?;
        let frac_bps: u32 = if frac.is_empty() {
            0
        } else {
            format!("{:0<4}", frac).parse().map_err(|_| invalid())?
        };
        let bps = whole
            .checked_mul(THRESHOLD_SCALE)
            .and_then(|w| w.checked_add(frac_bps))
            .ok_or_else(invalid)?;
        Self::from_basis_points(bps)
    }
}

impl TryFrom<String> for BallotThreshold {
    type Error = CrosschainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BallotThreshold> for String {
    fn from(value: BallotThreshold) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BallotThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / THRESHOLD_SCALE, (self.0 % THRESHOLD_SCALE) / 100)?;
        let rest = self.0 % 100;
        if rest != 0 {
            write!(f, "{:02}", rest)?;
        }
        Ok(())
    }
}

// ============================================================================
// BALLOT
// ============================================================================

/// Quorum-tracking object keyed by the digest of the claim being voted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub ballot_identifier: String,
    /// Eligible voters, fixed at creation
    pub voter_list: Vec<String>,
    /// One entry per voter, aligned with `voter_list`
    pub votes: Vec<VoteType>,
    pub observation_type: ObservationType,
    pub ballot_threshold: BallotThreshold,
    pub ballot_status: BallotStatus,
    pub ballot_creation_height: i64,
}

impl Ballot {
    /// Creates an in-progress ballot with every voter at `NotYetVoted`.
    pub fn new(
        ballot_identifier: impl Into<String>,
        voter_list: Vec<String>,
        observation_type: ObservationType,
        ballot_threshold: BallotThreshold,
        creation_height: i64,
    ) -> Self {
        let votes = vec![VoteType::NotYetVoted; voter_list.len()];
        Self {
            ballot_identifier: ballot_identifier.into(),
            voter_list,
            votes,
            observation_type,
            ballot_threshold,
            ballot_status: BallotStatus::InProgress,
            ballot_creation_height: creation_height,
        }
    }

    fn voter_position(&self, address: &str) -> Option<usize> {
        self.voter_list.iter().position(|v| v == address)
    }

    /// Returns the vote cast by `address`, if it is an eligible voter.
    pub fn vote_of(&self, address: &str) -> Option<VoteType> {
        self.voter_position(address).map(|i| self.votes[i])
    }

    /// Records a vote.
    ///
    /// Votes arriving after finalization are still recorded (so a voter can
    /// never vote twice) but never change the ballot status.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Vote recorded
    /// * `Err(CrosschainError::NotEligible)` - Voter is not in the voter list
    /// * `Err(CrosschainError::AlreadyVoted)` - Voter already cast a vote
    pub fn add_vote(&mut self, address: &str, vote: VoteType) -> Result<(), CrosschainError> {
        let position = self
            .voter_position(address)
            .ok_or_else(|| CrosschainError::NotEligible(address.to_string()))?;
        if self.votes[position] != VoteType::NotYetVoted {
            return Err(CrosschainError::AlreadyVoted(address.to_string()));
        }
        self.votes[position] = vote;
        Ok(())
    }

    /// Counts (success, failure, not yet voted).
    pub fn tally(&self) -> (usize, usize, usize) {
        self.votes.iter().fold((0, 0, 0), |(s, f, n), v| match v {
            VoteType::SuccessObservation => (s + 1, f, n),
            VoteType::FailureObservation => (s, f + 1, n),
            VoteType::NotYetVoted => (s, f, n + 1),
        })
    }

    /// Applies the finalization rule and reports whether this call finalized the ballot.
    ///
    /// Success finalizes when `success / len >= threshold`. Failure finalizes
    /// when `(len - not_yet_voted - success) / len >= threshold`. A ballot that
    /// is already finalized is never changed and reports `false`.
    pub fn check_finalization(&mut self) -> bool {
        if self.ballot_status.is_finalized() {
            return false;
        }
        let total = self.voter_list.len();
        let (success, _, not_yet_voted) = self.tally();
        if self.ballot_threshold.is_reached(success, total) {
            self.ballot_status = BallotStatus::FinalizedSuccess;
            return true;
        }
        let failure = total - not_yet_voted - success;
        if self.ballot_threshold.is_reached(failure, total) {
            self.ballot_status = BallotStatus::FinalizedFailure;
            return true;
        }
        false
    }

    /// Adds this ballot's reward units into `distribution`.
    ///
    /// Voters that agreed with the outcome earn +1; voters that disagreed or
    /// never voted earn -1. Unfinalized ballots contribute nothing.
    ///
    /// # Returns
    ///
    /// Number of positive reward units issued by this ballot
    pub fn build_rewards_distribution(&self, distribution: &mut BTreeMap<String, i64>) -> i64 {
        let winning_vote = match self.ballot_status {
            BallotStatus::FinalizedSuccess => VoteType::SuccessObservation,
            BallotStatus::FinalizedFailure => VoteType::FailureObservation,
            BallotStatus::InProgress => return 0,
        };
        let mut total_units = 0;
        for (voter, vote) in self.voter_list.iter().zip(self.votes.iter()) {
            let entry = distribution.entry(voter.clone()).or_insert(0);
            if *vote == winning_vote {
                *entry += 1;
                total_units += 1;
            } else {
                *entry -= 1;
            }
        }
        total_units
    }
}
