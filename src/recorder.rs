//! Vote recorder
//!
//! Accepts one ballot per voter per election. The eligibility check, the
//! ballot insert and the has-voted flip run under the per-voter lock, so two
//! concurrent casts by the same voter yield one receipt and one
//! `AlreadyVoted`. Casts by different voters never contend.

use crate::crypto::{CryptoUtils, KeyedLocks, SecureSaltManager};
use crate::eligibility::EligibilityGate;
use crate::store::Stores;
use crate::types::{
    Ballot, BallotKind, BallotStatus, ClientMeta, Fingerprint, Receipt, Slate, SlateStatus,
    VotingMode,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Fresh nonces make a collision practically impossible; this bounds the loop
const MAX_FINGERPRINT_ATTEMPTS: usize = 4;

/// A cast request as received from the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastBallot {
    pub election_id: Uuid,
    pub voter_id: Uuid,
    pub kind: BallotKind,
    pub slate_id: Option<Uuid>,
    pub mode: VotingMode,
    #[serde(default)]
    pub client: ClientMeta,
}

/// Public proof-of-vote view; never names the voter or the choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptView {
    pub receipt_code: String,
    pub election_id: Uuid,
    pub election_name: String,
    pub cast_at: DateTime<Utc>,
    pub mode: VotingMode,
    /// False once the ballot has been voided
    pub counted: bool,
}

/// Whether one voter has voted in one election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterStatus {
    pub election_id: Uuid,
    pub voter_id: Uuid,
    pub has_voted: bool,
    pub voted_at: Option<DateTime<Utc>>,
    pub receipt: Option<String>,
}

pub struct VoteRecorder {
    stores: Stores,
    gate: EligibilityGate,
    salts: SecureSaltManager,
    locks: Arc<KeyedLocks>,
}

impl VoteRecorder {
    pub fn new(stores: Stores, salts: SecureSaltManager, locks: Arc<KeyedLocks>) -> Self {
        let gate = EligibilityGate::new(stores.elections.clone(), stores.voters.clone());
        Self {
            stores,
            gate,
            salts,
            locks,
        }
    }

    pub fn gate(&self) -> &EligibilityGate {
        &self.gate
    }

    /// Record one ballot and return the voter's receipt
    ///
    /// Fails with `AlreadyVoted`, `NotEligible`, `VotingClosed`,
    /// `InvalidSlate` or `NotFound`; nothing is written on failure.
    pub fn cast_ballot(&self, request: CastBallot) -> Result<Receipt> {
        let key = KeyedLocks::voter_key(&request.election_id, &request.voter_id);
        let result = self
            .locks
            .with_lock(&key, || self.cast_locked(&request, Utc::now()));

        match &result {
            Ok(receipt) => info!(
                "🗳️  Ballot accepted: election={}, kind={:?}, mode={:?}, vote={}",
                request.election_id,
                request.kind,
                request.mode,
                CryptoUtils::short(&receipt.vote_fingerprint)
            ),
            Err(e) => warn!(
                "⚠️  Ballot rejected: election={}, reason={}",
                request.election_id, e
            ),
        }

        result
    }

    fn cast_locked(&self, request: &CastBallot, now: DateTime<Utc>) -> Result<Receipt> {
        let CastBallot {
            election_id,
            voter_id,
            ..
        } = request;

        // Re-evaluated under the lock, never cached
        self.gate
            .can_cast_at(election_id, voter_id, now)?
            .into_result(election_id, voter_id)?;

        let election = self
            .stores
            .elections
            .get_election(election_id)?
            .ok_or_else(|| Error::not_found("election", election_id))?;

        let slate = self.validate_choice(request)?;
        let slate_id = slate.as_ref().map(|slate| slate.id);

        let voter_fingerprint = self.salts.voter_fingerprint(voter_id, election_id);
        let vote_fingerprint = self.unique_vote_fingerprint(election_id, slate_id.as_ref(), now)?;
        let receipt_code = self.salts.receipt_code(&vote_fingerprint, now);

        let ballot = Ballot {
            id: Uuid::new_v4(),
            election_id: *election_id,
            kind: request.kind,
            status: BallotStatus::Confirmed,
            mode: request.mode,
            voter_fingerprint,
            vote_fingerprint: vote_fingerprint.clone(),
            slate_id,
            cast_at: now,
            receipt: receipt_code.clone(),
            client: request.client.clone(),
            void_reason: None,
        };

        self.stores.ballots.record_ballot(voter_id, ballot)?;

        Ok(Receipt {
            receipt_code,
            vote_fingerprint,
            cast_at: now,
            election_id: *election_id,
            election_name: election.name,
            slate_name: slate.map(|slate| slate.name),
            mode: request.mode,
        })
    }

    /// A slate vote needs an approved slate of this election; blank and
    /// null ballots must not reference one
    fn validate_choice(&self, request: &CastBallot) -> Result<Option<Slate>> {
        match (request.kind, request.slate_id) {
            (BallotKind::SlateVote, None) => Err(Error::InvalidSlate {
                reason: "a slate vote must name a slate".to_string(),
            }),
            (BallotKind::SlateVote, Some(slate_id)) => {
                let slate = self
                    .stores
                    .elections
                    .list_slates(&request.election_id)?
                    .into_iter()
                    .find(|slate| slate.id == slate_id)
                    .ok_or_else(|| Error::InvalidSlate {
                        reason: format!("slate {slate_id} is not part of this election"),
                    })?;

                if slate.status != SlateStatus::Approved {
                    return Err(Error::InvalidSlate {
                        reason: format!(
                            "slate {} is {:?}, only approved slates receive votes",
                            slate.number, slate.status
                        ),
                    });
                }
                Ok(Some(slate))
            }
            (kind, Some(_)) => Err(Error::InvalidSlate {
                reason: format!("a {kind:?} ballot cannot reference a slate"),
            }),
            (_, None) => Ok(None),
        }
    }

    fn unique_vote_fingerprint(
        &self,
        election_id: &Uuid,
        slate_id: Option<&Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Fingerprint> {
        for _ in 0..MAX_FINGERPRINT_ATTEMPTS {
            let fingerprint = self.salts.fresh_vote_fingerprint(election_id, slate_id, now);
            if !self.stores.ballots.vote_fingerprint_exists(&fingerprint)? {
                return Ok(fingerprint);
            }
        }
        Err(Error::internal("Could not derive a unique vote fingerprint"))
    }

    /// Proof-of-vote lookup by vote fingerprint
    pub fn lookup_receipt(&self, vote_fingerprint: &str) -> Result<ReceiptView> {
        let ballot = self
            .stores
            .ballots
            .find_by_vote_fingerprint(vote_fingerprint)?
            .ok_or_else(|| Error::not_found("receipt", CryptoUtils::short(vote_fingerprint)))?;

        let election = self
            .stores
            .elections
            .get_election(&ballot.election_id)?
            .ok_or_else(|| Error::not_found("election", ballot.election_id))?;

        Ok(ReceiptView {
            counted: ballot.is_counted(),
            receipt_code: ballot.receipt,
            election_id: ballot.election_id,
            election_name: election.name,
            cast_at: ballot.cast_at,
            mode: ballot.mode,
        })
    }

    pub fn voter_status(&self, election_id: &Uuid, voter_id: &Uuid) -> Result<VoterStatus> {
        let voter = self
            .stores
            .voters
            .get_voter(election_id, voter_id)?
            .ok_or_else(|| Error::not_found("voter", voter_id))?;

        Ok(VoterStatus {
            election_id: voter.election_id,
            voter_id: voter.voter_id,
            has_voted: voter.has_voted,
            voted_at: voter.voted_at,
            receipt: voter.receipt,
        })
    }

    /// Exclude a ballot from all counts; the voter's has-voted flag stays set
    pub fn void_ballot(&self, ballot_id: &Uuid, reason: impl Into<String>) -> Result<Ballot> {
        let reason = reason.into();
        let ballot = self.change_status(ballot_id, BallotStatus::Voided, Some(reason.clone()))?;
        warn!(
            "🚫 Ballot voided: election={}, vote={}, reason={}",
            ballot.election_id,
            CryptoUtils::short(&ballot.vote_fingerprint),
            reason
        );
        Ok(ballot)
    }

    /// Count a previously voided ballot again
    pub fn reinstate_ballot(&self, ballot_id: &Uuid) -> Result<Ballot> {
        let ballot = self.change_status(ballot_id, BallotStatus::Confirmed, None)?;
        info!(
            "♻️  Ballot reinstated: election={}, vote={}",
            ballot.election_id,
            CryptoUtils::short(&ballot.vote_fingerprint)
        );
        Ok(ballot)
    }

    fn change_status(
        &self,
        ballot_id: &Uuid,
        status: BallotStatus,
        reason: Option<String>,
    ) -> Result<Ballot> {
        let ballot = self
            .stores
            .ballots
            .get_ballot(ballot_id)?
            .ok_or_else(|| Error::not_found("ballot", ballot_id))?;

        // Serialized with tally writes so a certification cannot slip in between
        let key = KeyedLocks::tally_key(&ballot.election_id);
        self.locks.with_lock(&key, || {
            let certified = self
                .stores
                .tallies
                .load_run(&ballot.election_id)?
                .is_some_and(|run| run.is_certified());
            if certified {
                return Err(Error::AlreadyCertified);
            }
            self.stores
                .ballots
                .set_ballot_status(ballot_id, status, reason)
        })
    }
}
