//! Tally aggregation
//!
//! Every pass recomputes the whole tally from the ballot store and never
//! reads a previous pass as a baseline, so repeating it on unchanged ballots
//! yields the same counts, percentages and ranks.

use crate::config::TieBreak;
use crate::tally::lifecycle::Transition;
use crate::store::Stores;
use crate::types::{
    Ballot, BallotKind, Percentage, Slate, TallyRow, TallyRun, TallyStatus, VotingMode,
};
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// A run together with its full row set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub run: TallyRun,
    /// Ordered by rank
    pub rows: Vec<TallyRow>,
}

/// Turnout and ballot breakdown of an election, including casting mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingStatistics {
    pub election_id: Uuid,
    pub registered: u64,
    pub eligible: u64,
    pub voted: u64,
    pub abstentions: u64,
    pub participation: Percentage,
    pub abstention: Percentage,

    pub counted: u64,
    pub valid: u64,
    pub blank: u64,
    pub null: u64,
    pub voided: u64,
    pub valid_share: Percentage,
    pub blank_share: Percentage,
    pub null_share: Percentage,

    pub in_person: u64,
    pub remote: u64,
    pub in_person_share: Percentage,
    pub remote_share: Percentage,
}

/// Confirmed and voided ballot counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BallotCounts {
    valid: u64,
    blank: u64,
    null: u64,
    voided: u64,
    in_person: u64,
    remote: u64,
}

impl BallotCounts {
    fn counted(&self) -> u64 {
        self.valid + self.blank + self.null
    }
}

/// Count ballots into buckets and per-slate totals
///
/// Slate votes naming a slate outside `approved` count as null, which keeps
/// the row sum equal to the valid count.
fn count_ballots(
    ballots: &[Ballot],
    approved: &[Slate],
) -> (BallotCounts, HashMap<Uuid, u64>) {
    let mut counts = BallotCounts::default();
    let mut per_slate: HashMap<Uuid, u64> = approved.iter().map(|slate| (slate.id, 0)).collect();

    for ballot in ballots {
        if !ballot.is_counted() {
            counts.voided += 1;
            continue;
        }

        match ballot.mode {
            VotingMode::InPerson => counts.in_person += 1,
            VotingMode::Remote => counts.remote += 1,
        }

        match (ballot.kind, ballot.slate_id) {
            (BallotKind::SlateVote, Some(slate_id)) => match per_slate.get_mut(&slate_id) {
                Some(votes) => {
                    *votes += 1;
                    counts.valid += 1;
                }
                None => {
                    debug!("Ballot for non-approved slate {} counted as null", slate_id);
                    counts.null += 1;
                }
            },
            (BallotKind::Blank, _) => counts.blank += 1,
            _ => counts.null += 1,
        }
    }

    (counts, per_slate)
}

/// Rank rows by votes descending, breaking ties by `tie_break`
///
/// `rows` must arrive in slate directory order.
pub fn rank_rows(rows: &mut [TallyRow], tie_break: TieBreak) {
    match tie_break {
        TieBreak::SlateNumber => rows.sort_by(|a, b| {
            b.votes
                .cmp(&a.votes)
                .then(a.slate_number.cmp(&b.slate_number))
                .then(a.slate_id.cmp(&b.slate_id))
        }),
        // Stable sort keeps directory order among equals
        TieBreak::EncounterOrder => rows.sort_by(|a, b| b.votes.cmp(&a.votes)),
    }

    for (index, row) in rows.iter_mut().enumerate() {
        row.rank = index as u32 + 1;
        row.elected = row.rank == 1;
    }
}

/// Recompute a full tally onto `base` from raw inputs, without side effects
///
/// `base` keeps its identity, status and timestamps; counts, percentages,
/// winner fields and rows are replaced and the stale fingerprint is cleared.
pub fn build_tally(
    base: &TallyRun,
    eligible: u64,
    voted: u64,
    approved: &[Slate],
    ballots: &[Ballot],
    tie_break: TieBreak,
) -> Tally {
    let (counts, per_slate) = count_ballots(ballots, approved);
    let counted = counts.counted();

    let mut rows: Vec<TallyRow> = approved
        .iter()
        .map(|slate| {
            let votes = per_slate.get(&slate.id).copied().unwrap_or(0);
            TallyRow {
                run_id: base.id,
                slate_id: slate.id,
                slate_number: slate.number,
                slate_name: slate.name.clone(),
                votes,
                share_of_counted: Percentage::from_ratio(votes, counted),
                share_of_valid: Percentage::from_ratio(votes, counts.valid),
                rank: 0,
                elected: false,
            }
        })
        .collect();
    rank_rows(&mut rows, tie_break);

    let participation = Percentage::from_ratio(voted, eligible);
    let abstention = if eligible == 0 {
        Percentage::ZERO
    } else {
        participation.complement()
    };

    let leader = rows.first();
    let run = TallyRun {
        eligible,
        voted,
        abstentions: eligible.saturating_sub(voted),
        valid: counts.valid,
        blank: counts.blank,
        null: counts.null,
        voided: counts.voided,
        participation,
        abstention,
        winning_slate_id: leader.map(|row| row.slate_id),
        winning_slate_votes: leader.map(|row| row.votes),
        fingerprint: None,
        aggregated_at: Some(Utc::now()),
        ..base.clone()
    };

    Tally { run, rows }
}

/// Reads ballots, slates and voters; writes only the tally store
pub struct TallyAggregator {
    stores: Stores,
    tie_break: TieBreak,
}

impl TallyAggregator {
    pub fn new(stores: Stores, tie_break: TieBreak) -> Self {
        Self { stores, tie_break }
    }

    /// Recompute the tally onto `base` without writing anything
    pub fn compute(&self, base: &TallyRun) -> Result<Tally> {
        let election_id = base.election_id;
        let approved = self.stores.elections.list_approved_slates(&election_id)?;
        let ballots = self.stores.ballots.ballots(&election_id)?;
        let eligible = self.stores.voters.count_eligible(&election_id)?;
        let voted = self.stores.voters.count_voted(&election_id)?;

        let tally = build_tally(base, eligible, voted, &approved, &ballots, self.tie_break);

        debug!(
            "📊 Tally computed: election={}, valid={}, blank={}, null={}, voided={}, slates={}",
            election_id,
            tally.run.valid,
            tally.run.blank,
            tally.run.null,
            tally.run.voided,
            tally.rows.len()
        );

        Ok(tally)
    }

    /// Recompute and persist the authoritative tally of an election
    ///
    /// Creates an in-progress run when none exists. A sealed fingerprint is
    /// carried over untouched so a later integrity check still compares
    /// against the value taken at finalization. The caller holds the
    /// election's tally lock.
    pub fn aggregate(&self, election_id: &Uuid) -> Result<Tally> {
        if self.stores.elections.get_election(election_id)?.is_none() {
            return Err(Error::not_found("election", election_id));
        }

        let base = match self.stores.tallies.load_run(election_id)? {
            Some(run) if run.is_certified() || run.status == TallyStatus::Certified => {
                return Err(Error::AlreadyCertified);
            }
            Some(run) if run.status == TallyStatus::Annulled => {
                return Err(Error::InvalidTransition {
                    from: run.status,
                    action: Transition::Reprocess,
                });
            }
            Some(run) => run,
            None => {
                let mut run = TallyRun::new(*election_id, TallyStatus::InProgress);
                run.started_at = Some(Utc::now());
                run
            }
        };

        let mut tally = self.compute(&base)?;
        tally.run.fingerprint = base.fingerprint;
        self.stores.tallies.replace_tally(&tally.run, &tally.rows)?;
        Ok(tally)
    }

    /// Turnout, bucket and mode breakdown computed fresh from ballots
    pub fn statistics(&self, election_id: &Uuid) -> Result<VotingStatistics> {
        if self.stores.elections.get_election(election_id)?.is_none() {
            return Err(Error::not_found("election", election_id));
        }

        let approved = self.stores.elections.list_approved_slates(election_id)?;
        let ballots = self.stores.ballots.ballots(election_id)?;
        let registered = self.stores.voters.count_registered(election_id)?;
        let eligible = self.stores.voters.count_eligible(election_id)?;
        let voted = self.stores.voters.count_voted(election_id)?;

        let (counts, _) = count_ballots(&ballots, &approved);
        let counted = counts.counted();
        let participation = Percentage::from_ratio(voted, eligible);

        Ok(VotingStatistics {
            election_id: *election_id,
            registered,
            eligible,
            voted,
            abstentions: eligible.saturating_sub(voted),
            participation,
            abstention: if eligible == 0 {
                Percentage::ZERO
            } else {
                participation.complement()
            },
            counted,
            valid: counts.valid,
            blank: counts.blank,
            null: counts.null,
            voided: counts.voided,
            valid_share: Percentage::from_ratio(counts.valid, counted),
            blank_share: Percentage::from_ratio(counts.blank, counted),
            null_share: Percentage::from_ratio(counts.null, counted),
            in_person: counts.in_person,
            remote: counts.remote,
            in_person_share: Percentage::from_ratio(counts.in_person, counted),
            remote_share: Percentage::from_ratio(counts.remote, counted),
        })
    }
}
