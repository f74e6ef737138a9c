//! Apuration service
//!
//! Owns the lifecycle of each election's tally run and is the single entry
//! point the transport layer talks to. Every transition takes the election's
//! tally lock, checks legality against [`next_status`] before touching
//! anything, and persists its outcome in one write. A refused transition
//! leaves the run exactly as it was.

use crate::config::{Config, LockConfig, TallyConfig};
use crate::crypto::{CertificationSigner, CryptoUtils, KeyedLocks, LockJanitor, SecureSaltManager};
use crate::eligibility::Eligibility;
use crate::recorder::{CastBallot, ReceiptView, VoteRecorder, VoterStatus};
use crate::store::Stores;
use crate::tally::{
    IntegrityCertifier, Tally, TallyAggregator, Transition, VotingStatistics, WinnerResolution,
    next_status, resolve_winner,
};
use crate::types::{
    Ballot, Certification, ElectionPhase, Fingerprint, Percentage, Receipt, TallyRow, TallyRun,
    TallyStatus, Voter,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Full result view of an election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReport {
    pub run: TallyRun,
    /// Ordered by rank
    pub rows: Vec<TallyRow>,
    pub winner: Option<WinnerResolution>,
}

/// Live counting progress, computed without writing anything
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialView {
    pub election_id: Uuid,
    pub phase: ElectionPhase,
    pub eligible: u64,
    pub voted: u64,
    /// Confirmed ballots in any bucket
    pub counted: u64,
    /// Voted over eligible
    pub progress: Percentage,
    pub rows: Vec<TallyRow>,
    pub computed_at: DateTime<Utc>,
}

/// Partial tally, or an explicit marker that it cannot be shown yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "visibility", rename_all = "kebab-case")]
pub enum PartialTally {
    NotVisible { phase: ElectionPhase },
    Visible(PartialView),
}

pub struct Apuration {
    stores: Stores,
    recorder: VoteRecorder,
    aggregator: TallyAggregator,
    signer: CertificationSigner,
    locks: Arc<KeyedLocks>,
    tally_config: TallyConfig,
    lock_config: LockConfig,
}

impl Apuration {
    /// Build the service from loaded configuration
    pub fn new(stores: Stores, config: &Config) -> Result<Self> {
        let salts = SecureSaltManager::from_config(&config.security)?;
        let signer = CertificationSigner::from_config(&config.security)?;
        Ok(Self::with_parts(
            stores,
            salts,
            signer,
            config.tally.clone(),
            config.locks.clone(),
        ))
    }

    pub fn with_parts(
        stores: Stores,
        salts: SecureSaltManager,
        signer: CertificationSigner,
        tally_config: TallyConfig,
        lock_config: LockConfig,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        Self {
            recorder: VoteRecorder::new(stores.clone(), salts, locks.clone()),
            aggregator: TallyAggregator::new(stores.clone(), tally_config.tie_break),
            stores,
            signer,
            locks,
            tally_config,
            lock_config,
        }
    }

    /// Create for testing with random salts and an ephemeral signing key
    pub fn for_testing(stores: Stores) -> Self {
        Self::with_parts(
            stores,
            SecureSaltManager::for_testing(),
            CertificationSigner::for_testing(),
            TallyConfig::default(),
            LockConfig::default(),
        )
    }

    /// Janitor pruning idle per-voter locks; run it with `tokio::spawn`
    pub fn lock_janitor(&self, stop_signal: tokio::sync::mpsc::Receiver<()>) -> LockJanitor {
        LockJanitor::new(
            self.locks.clone(),
            Duration::from_secs(self.lock_config.prune_interval_seconds),
            stop_signal,
        )
    }

    pub fn certification_public_key(&self) -> String {
        self.signer.public_key_hex()
    }

    pub fn can_cast(&self, election_id: &Uuid, voter_id: &Uuid) -> Result<Eligibility> {
        self.recorder.gate().can_cast(election_id, voter_id)
    }

    pub fn cast_ballot(&self, request: CastBallot) -> Result<Receipt> {
        self.recorder.cast_ballot(request)
    }

    pub fn lookup_receipt(&self, vote_fingerprint: &str) -> Result<ReceiptView> {
        self.recorder.lookup_receipt(vote_fingerprint)
    }

    pub fn voter_status(&self, election_id: &Uuid, voter_id: &Uuid) -> Result<VoterStatus> {
        self.recorder.voter_status(election_id, voter_id)
    }

    pub fn void_ballot(&self, ballot_id: &Uuid, reason: impl Into<String>) -> Result<Ballot> {
        self.recorder.void_ballot(ballot_id, reason)
    }

    pub fn reinstate_ballot(&self, ballot_id: &Uuid) -> Result<Ballot> {
        self.recorder.reinstate_ballot(ballot_id)
    }

    /// Open or reopen the run, aggregate and move the election into tallying
    ///
    /// The election leaves its voting phase only once the run is persisted,
    /// so a failed aggregation keeps voting open.
    pub fn start(&self, election_id: &Uuid) -> Result<TallyRun> {
        self.transition(election_id, Transition::Start, |mut run, to| {
            run.status = to;
            run.started_at.get_or_insert_with(Utc::now);
            run.paused_at = None;
            run.pause_reason = None;

            let tally = self.aggregator.compute(&run)?;
            self.stores.tallies.replace_tally(&tally.run, &tally.rows)?;
            self.stores.elections.begin_tallying(election_id)?;
            Ok(tally.run)
        })
    }

    pub fn pause(&self, election_id: &Uuid, reason: impl Into<String>) -> Result<TallyRun> {
        let reason = reason.into();
        self.transition(election_id, Transition::Pause, |mut run, to| {
            run.status = to;
            run.paused_at = Some(Utc::now());
            run.pause_reason = Some(reason);
            self.stores.tallies.save_run(&run)?;
            Ok(run)
        })
    }

    pub fn resume(&self, election_id: &Uuid) -> Result<TallyRun> {
        self.transition(election_id, Transition::Resume, |mut run, to| {
            run.status = to;
            run.paused_at = None;
            run.pause_reason = None;
            self.stores.tallies.save_run(&run)?;
            Ok(run)
        })
    }

    /// Aggregate, fingerprint and complete the run
    ///
    /// On failure the stored run keeps its in-progress state.
    pub fn finalize(&self, election_id: &Uuid) -> Result<TallyRun> {
        self.transition(election_id, Transition::Finalize, |run, to| {
            self.complete(run, to)
        })
    }

    /// Make a completed run official
    ///
    /// The tally is recomputed from ballots first; a fingerprint that no
    /// longer matches the stored one halts certification.
    pub fn certify(&self, election_id: &Uuid, certifier_id: &str) -> Result<TallyRun> {
        self.transition(election_id, Transition::Certify, |mut run, to| {
            let recomputed = self.recompute_fingerprint(&run)?;
            let stored = run.fingerprint.clone().unwrap_or_default();
            IntegrityCertifier::verify(&stored, &recomputed)?;

            run.status = to;
            run.certification = Some(Certification {
                certified_by: certifier_id.to_string(),
                certified_at: Utc::now(),
                signature: self.signer.sign(&stored),
                public_key: self.signer.public_key_hex(),
            });
            self.stores.tallies.save_run(&run)?;
            Ok(run)
        })
    }

    /// Reopen a non-certified run and re-run the finalize pipeline
    pub fn reprocess(&self, election_id: &Uuid) -> Result<TallyRun> {
        self.transition(election_id, Transition::Reprocess, |mut run, to| {
            run.status = to;
            run.ended_at = None;
            run.fingerprint = None;
            self.stores.tallies.save_run(&run)?;

            let completed = next_status(run.status, Transition::Finalize)?;
            self.complete(run, completed)
        })
    }

    pub fn contest(&self, election_id: &Uuid, reason: impl Into<String>) -> Result<TallyRun> {
        let reason = reason.into();
        self.transition(election_id, Transition::Contest, |mut run, to| {
            run.status = to;
            run.contest_reason = Some(reason);
            self.stores.tallies.save_run(&run)?;
            Ok(run)
        })
    }

    /// Terminal: an annulled run accepts no further transition
    pub fn annul(&self, election_id: &Uuid, reason: impl Into<String>) -> Result<TallyRun> {
        let reason = reason.into();
        self.transition(election_id, Transition::Annul, |mut run, to| {
            run.status = to;
            run.annul_reason = Some(reason);
            run.ended_at.get_or_insert_with(Utc::now);
            self.stores.tallies.save_run(&run)?;
            Ok(run)
        })
    }

    /// Recompute and persist the tally outside any transition
    pub fn aggregate(&self, election_id: &Uuid) -> Result<Tally> {
        let key = KeyedLocks::tally_key(election_id);
        self.locks
            .with_lock(&key, || self.aggregator.aggregate(election_id))
    }

    fn complete(&self, run: TallyRun, to: TallyStatus) -> Result<TallyRun> {
        let mut tally = self.aggregator.compute(&run)?;
        let fingerprint = IntegrityCertifier::fingerprint(&tally.run, &tally.rows);

        tally.run.fingerprint = Some(fingerprint);
        tally.run.status = to;
        tally.run.ended_at = Some(Utc::now());

        self.stores.tallies.replace_tally(&tally.run, &tally.rows)?;
        Ok(tally.run)
    }

    fn recompute_fingerprint(&self, run: &TallyRun) -> Result<Fingerprint> {
        let tally = self.aggregator.compute(run)?;
        Ok(IntegrityCertifier::fingerprint(&tally.run, &tally.rows))
    }

    /// The stored run, or a transient not-started one
    fn current_run(&self, election_id: &Uuid) -> Result<TallyRun> {
        if self.stores.elections.get_election(election_id)?.is_none() {
            return Err(Error::not_found("election", election_id));
        }
        Ok(self
            .stores
            .tallies
            .load_run(election_id)?
            .unwrap_or_else(|| TallyRun::new(*election_id, TallyStatus::NotStarted)))
    }

    fn transition(
        &self,
        election_id: &Uuid,
        action: Transition,
        apply: impl FnOnce(TallyRun, TallyStatus) -> Result<TallyRun>,
    ) -> Result<TallyRun> {
        let key = KeyedLocks::tally_key(election_id);
        let result = self.locks.with_lock(&key, || {
            let run = self.current_run(election_id)?;
            let to = next_status(run.status, action)?;
            apply(run, to)
        });

        match &result {
            Ok(run) => info!(
                "⚖️  Tally {}: election={}, status={}",
                action, election_id, run.status
            ),
            Err(e @ Error::IntegrityMismatch { .. }) => error!(
                "🚨 Tally {} halted: election={}, {}",
                action, election_id, e
            ),
            Err(e) => warn!(
                "⚠️  Tally {} refused: election={}, {}",
                action, election_id, e
            ),
        }

        result
    }

    /// Current lifecycle status; `NotStarted` when no run exists
    pub fn status(&self, election_id: &Uuid) -> Result<TallyStatus> {
        Ok(self.current_run(election_id)?.status)
    }

    pub fn full_tally(&self, election_id: &Uuid) -> Result<TallyReport> {
        let run = self
            .stores
            .tallies
            .load_run(election_id)?
            .ok_or_else(|| Error::not_found("tally run", election_id))?;
        let mut rows = self.stores.tallies.load_rows(&run.id)?;
        rows.sort_by_key(|row| row.rank);
        let winner = resolve_winner(&run, &rows);

        Ok(TallyReport { run, rows, winner })
    }

    /// Fresh partial tally if the election's phase allows showing one
    pub fn partial_tally(&self, election_id: &Uuid) -> Result<PartialTally> {
        let election = self
            .stores
            .elections
            .get_election(election_id)?
            .ok_or_else(|| Error::not_found("election", election_id))?;

        if !self.tally_config.permits_partial(election.phase) {
            return Ok(PartialTally::NotVisible {
                phase: election.phase,
            });
        }

        let base = self
            .stores
            .tallies
            .load_run(election_id)?
            .unwrap_or_else(|| TallyRun::new(*election_id, TallyStatus::NotStarted));
        let tally = self.aggregator.compute(&base)?;

        Ok(PartialTally::Visible(PartialView {
            election_id: *election_id,
            phase: election.phase,
            eligible: tally.run.eligible,
            voted: tally.run.voted,
            counted: tally.run.total_counted(),
            progress: tally.run.participation,
            rows: tally.rows,
            computed_at: Utc::now(),
        }))
    }

    pub fn statistics(&self, election_id: &Uuid) -> Result<VotingStatistics> {
        self.aggregator.statistics(election_id)
    }

    /// Voters whose has-voted flag is set, ordered by voter id
    pub fn voters_who_voted(&self, election_id: &Uuid) -> Result<Vec<Voter>> {
        Ok(self
            .registered_voters(election_id)?
            .into_iter()
            .filter(|voter| voter.has_voted)
            .collect())
    }

    /// Apt voters who have not voted
    pub fn abstained_voters(&self, election_id: &Uuid) -> Result<Vec<Voter>> {
        Ok(self
            .registered_voters(election_id)?
            .into_iter()
            .filter(|voter| voter.apt && !voter.has_voted)
            .collect())
    }

    fn registered_voters(&self, election_id: &Uuid) -> Result<Vec<Voter>> {
        if self.stores.elections.get_election(election_id)?.is_none() {
            return Err(Error::not_found("election", election_id));
        }
        self.stores.voters.list_voters(election_id)
    }

    /// Recompute from ballots and compare with the stored fingerprint
    ///
    /// Returns the matching fingerprint, or `IntegrityMismatch`.
    pub fn verify_integrity(&self, election_id: &Uuid) -> Result<Fingerprint> {
        let run = self
            .stores
            .tallies
            .load_run(election_id)?
            .ok_or_else(|| Error::not_found("tally run", election_id))?;
        let stored = run
            .fingerprint
            .clone()
            .ok_or_else(|| Error::not_found("tally fingerprint", election_id))?;

        let recomputed = self.recompute_fingerprint(&run)?;
        if let Err(e) = IntegrityCertifier::verify(&stored, &recomputed) {
            error!(
                "🚨 Integrity check failed: election={}, stored={}, recomputed={}",
                election_id,
                CryptoUtils::short(&stored),
                CryptoUtils::short(&recomputed)
            );
            return Err(e);
        }
        Ok(stored)
    }

    /// Check the certification signature against the stored fingerprint
    pub fn verify_certification(&self, election_id: &Uuid) -> Result<()> {
        let run = self
            .stores
            .tallies
            .load_run(election_id)?
            .ok_or_else(|| Error::not_found("tally run", election_id))?;
        let certification = run
            .certification
            .as_ref()
            .ok_or_else(|| Error::not_found("certification", election_id))?;
        let fingerprint = run
            .fingerprint
            .as_deref()
            .ok_or_else(|| Error::not_found("tally fingerprint", election_id))?;

        CertificationSigner::verify(
            &certification.public_key,
            fingerprint,
            &certification.signature,
        )
    }
}
