//! Eligibility gate
//!
//! Decides whether a ballot may be accepted for a voter right now. The
//! answer is always read fresh from the stores; callers must ask again
//! immediately before every cast.

use crate::store::{ElectionDirectory, VoterRegistry};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// First failing check of a refused cast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "code", content = "detail")]
pub enum IneligibilityReason {
    VoterNotFound,
    /// Carries the disqualification reason
    NotApt(String),
    AlreadyVoted,
    /// Carries why voting is closed
    VotingNotOpen(String),
}

impl fmt::Display for IneligibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VoterNotFound => f.write_str("voter not registered for this election"),
            Self::NotApt(reason) => write!(f, "voter is not apt: {reason}"),
            Self::AlreadyVoted => f.write_str("already voted"),
            Self::VotingNotOpen(reason) => write!(f, "voting not open: {reason}"),
        }
    }
}

/// Outcome of an eligibility check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub allowed: bool,
    pub reason: Option<IneligibilityReason>,
}

impl Eligibility {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: IneligibilityReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    /// Convert a refusal into the matching casting error
    pub fn into_result(self, election_id: &Uuid, voter_id: &Uuid) -> Result<()> {
        match self.reason {
            None => Ok(()),
            Some(IneligibilityReason::VoterNotFound) => Err(Error::not_found(
                "voter",
                format!("{voter_id} in election {election_id}"),
            )),
            Some(IneligibilityReason::NotApt(reason)) => Err(Error::NotEligible { reason }),
            Some(IneligibilityReason::AlreadyVoted) => Err(Error::AlreadyVoted),
            Some(IneligibilityReason::VotingNotOpen(reason)) => {
                Err(Error::VotingClosed { reason })
            }
        }
    }
}

/// Pure read over elections and voters
pub struct EligibilityGate {
    elections: Arc<dyn ElectionDirectory>,
    voters: Arc<dyn VoterRegistry>,
}

impl EligibilityGate {
    pub fn new(elections: Arc<dyn ElectionDirectory>, voters: Arc<dyn VoterRegistry>) -> Self {
        Self { elections, voters }
    }

    /// Check a (election, voter) pair at the current instant
    pub fn can_cast(&self, election_id: &Uuid, voter_id: &Uuid) -> Result<Eligibility> {
        self.can_cast_at(election_id, voter_id, Utc::now())
    }

    /// Check a (election, voter) pair at `now`
    ///
    /// Order: voter exists, voter apt, not yet voted, election open.
    /// An unknown election is an error rather than a refusal.
    pub fn can_cast_at(
        &self,
        election_id: &Uuid,
        voter_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Eligibility> {
        let election = self
            .elections
            .get_election(election_id)?
            .ok_or_else(|| Error::not_found("election", election_id))?;

        let Some(voter) = self.voters.get_voter(election_id, voter_id)? else {
            return Ok(Eligibility::denied(IneligibilityReason::VoterNotFound));
        };

        if !voter.apt {
            let reason = voter
                .disqualification_reason
                .unwrap_or_else(|| "no reason recorded".to_string());
            return Ok(Eligibility::denied(IneligibilityReason::NotApt(reason)));
        }

        if voter.has_voted {
            return Ok(Eligibility::denied(IneligibilityReason::AlreadyVoted));
        }

        if let Some(reason) = election.closed_reason(now) {
            return Ok(Eligibility::denied(IneligibilityReason::VotingNotOpen(
                reason,
            )));
        }

        Ok(Eligibility::allowed())
    }
}
