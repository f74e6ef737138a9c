//! In-memory store with JSON snapshot durability
//!
//! One `RwLock` guards the whole state so that the ballot insert and the
//! has-voted flip in [`BallotStore::record_ballot`] land together.
//! [`MemoryStore::save_to`] writes a temporary file and renames it over the
//! target, so a crash mid-save never leaves a truncated snapshot.

use crate::crypto::CryptoUtils;
use crate::store::{BallotStore, ElectionDirectory, TallyStore, VoterRegistry};
use crate::types::{
    Ballot, BallotStatus, Election, ElectionPhase, ElectionStatus, Fingerprint, Slate, TallyRow,
    TallyRun, Voter,
};
use crate::{Error, Result, storage_error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    elections: HashMap<Uuid, Election>,
    /// Slates per election, in registration order
    slates: HashMap<Uuid, Vec<Slate>>,
    /// Voters per election, keyed by voter id
    voters: HashMap<Uuid, HashMap<Uuid, Voter>>,
    ballots: HashMap<Uuid, Ballot>,
    /// Vote fingerprint -> ballot id
    vote_index: HashMap<Fingerprint, Uuid>,
    /// Authoritative run per election
    runs: HashMap<Uuid, TallyRun>,
    /// Rows per run id
    rows: HashMap<Uuid, Vec<TallyRow>>,
}

/// Thread-safe in-memory implementation of every storage seam
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::internal("Store read error"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::internal("Store write error"))
    }

    pub fn insert_election(&self, election: Election) -> Result<()> {
        self.write()?.elections.insert(election.id, election);
        Ok(())
    }

    pub fn insert_slate(&self, slate: Slate) -> Result<()> {
        let mut state = self.write()?;
        if !state.elections.contains_key(&slate.election_id) {
            return Err(Error::not_found("election", slate.election_id));
        }
        let slates = state.slates.entry(slate.election_id).or_default();
        slates.retain(|existing| existing.id != slate.id);
        slates.push(slate);
        Ok(())
    }

    pub fn register_voter(&self, voter: Voter) -> Result<()> {
        let mut state = self.write()?;
        if !state.elections.contains_key(&voter.election_id) {
            return Err(Error::not_found("election", voter.election_id));
        }
        state
            .voters
            .entry(voter.election_id)
            .or_default()
            .insert(voter.voter_id, voter);
        Ok(())
    }

    /// Phase changes arrive from the scheduling service
    pub fn set_phase(&self, election_id: &Uuid, phase: ElectionPhase) -> Result<()> {
        let mut state = self.write()?;
        let election = state
            .elections
            .get_mut(election_id)
            .ok_or_else(|| Error::not_found("election", election_id))?;
        election.phase = phase;
        Ok(())
    }

    pub fn set_status(&self, election_id: &Uuid, status: ElectionStatus) -> Result<()> {
        let mut state = self.write()?;
        let election = state
            .elections
            .get_mut(election_id)
            .ok_or_else(|| Error::not_found("election", election_id))?;
        election.status = status;
        Ok(())
    }

    /// Serialize the full state as JSON
    pub fn to_json(&self) -> Result<String> {
        let state = self.read()?;
        Ok(serde_json::to_string_pretty(&*state)?)
    }

    /// Restore a store from a JSON snapshot
    pub fn from_json(json: &str) -> Result<Self> {
        let state: State = serde_json::from_str(json)?;
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Atomically replace the snapshot at `path`
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let tmp = path.with_extension("tmp");

        std::fs::write(&tmp, json)
            .map_err(|e| storage_error!("Failed to write {}: {}", tmp.display(), e))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| storage_error!("Failed to replace {}: {}", path.display(), e))?;

        tracing::debug!("💾 Snapshot saved to {}", path.display());
        Ok(())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| storage_error!("Failed to read {}: {}", path.display(), e))?;
        Self::from_json(&json)
    }
}

impl ElectionDirectory for MemoryStore {
    fn get_election(&self, election_id: &Uuid) -> Result<Option<Election>> {
        Ok(self.read()?.elections.get(election_id).cloned())
    }

    fn list_slates(&self, election_id: &Uuid) -> Result<Vec<Slate>> {
        Ok(self
            .read()?
            .slates
            .get(election_id)
            .cloned()
            .unwrap_or_default())
    }

    fn begin_tallying(&self, election_id: &Uuid) -> Result<()> {
        let mut state = self.write()?;
        let election = state
            .elections
            .get_mut(election_id)
            .ok_or_else(|| Error::not_found("election", election_id))?;
        election.phase = ElectionPhase::Tallying;
        election.status = ElectionStatus::Tallying;
        Ok(())
    }
}

impl VoterRegistry for MemoryStore {
    fn get_voter(&self, election_id: &Uuid, voter_id: &Uuid) -> Result<Option<Voter>> {
        Ok(self
            .read()?
            .voters
            .get(election_id)
            .and_then(|voters| voters.get(voter_id))
            .cloned())
    }

    fn count_eligible(&self, election_id: &Uuid) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .voters
            .get(election_id)
            .map_or(0, |voters| voters.values().filter(|v| v.apt).count()) as u64)
    }

    fn count_voted(&self, election_id: &Uuid) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .voters
            .get(election_id)
            .map_or(0, |voters| voters.values().filter(|v| v.has_voted).count()) as u64)
    }

    fn count_registered(&self, election_id: &Uuid) -> Result<u64> {
        let state = self.read()?;
        Ok(state.voters.get(election_id).map_or(0, HashMap::len) as u64)
    }

    fn list_voters(&self, election_id: &Uuid) -> Result<Vec<Voter>> {
        let state = self.read()?;
        let mut voters: Vec<Voter> = state
            .voters
            .get(election_id)
            .map(|voters| voters.values().cloned().collect())
            .unwrap_or_default();
        voters.sort_by_key(|voter| voter.voter_id);
        Ok(voters)
    }
}

impl BallotStore for MemoryStore {
    fn record_ballot(&self, voter_id: &Uuid, ballot: Ballot) -> Result<()> {
        let mut state = self.write()?;

        if state.vote_index.contains_key(&ballot.vote_fingerprint) {
            return Err(storage_error!(
                "Vote fingerprint {} already recorded",
                CryptoUtils::short(&ballot.vote_fingerprint)
            ));
        }

        let voter = state
            .voters
            .get_mut(&ballot.election_id)
            .and_then(|voters| voters.get_mut(voter_id))
            .ok_or_else(|| Error::not_found("voter", voter_id))?;

        // Compare-and-set on the has-voted flag
        if voter.has_voted {
            return Err(Error::AlreadyVoted);
        }
        voter.has_voted = true;
        voter.voted_at = Some(ballot.cast_at);
        voter.receipt = Some(ballot.receipt.clone());

        state
            .vote_index
            .insert(ballot.vote_fingerprint.clone(), ballot.id);
        state.ballots.insert(ballot.id, ballot);
        Ok(())
    }

    fn vote_fingerprint_exists(&self, vote_fingerprint: &str) -> Result<bool> {
        Ok(self.read()?.vote_index.contains_key(vote_fingerprint))
    }

    fn get_ballot(&self, ballot_id: &Uuid) -> Result<Option<Ballot>> {
        Ok(self.read()?.ballots.get(ballot_id).cloned())
    }

    fn find_by_vote_fingerprint(&self, vote_fingerprint: &str) -> Result<Option<Ballot>> {
        let state = self.read()?;
        Ok(state
            .vote_index
            .get(vote_fingerprint)
            .and_then(|id| state.ballots.get(id))
            .cloned())
    }

    fn ballots(&self, election_id: &Uuid) -> Result<Vec<Ballot>> {
        let state = self.read()?;
        let mut ballots: Vec<Ballot> = state
            .ballots
            .values()
            .filter(|ballot| ballot.election_id == *election_id)
            .cloned()
            .collect();
        ballots.sort_by(|a, b| a.cast_at.cmp(&b.cast_at).then(a.id.cmp(&b.id)));
        Ok(ballots)
    }

    fn set_ballot_status(
        &self,
        ballot_id: &Uuid,
        status: BallotStatus,
        reason: Option<String>,
    ) -> Result<Ballot> {
        let mut state = self.write()?;
        let ballot = state
            .ballots
            .get_mut(ballot_id)
            .ok_or_else(|| Error::not_found("ballot", ballot_id))?;
        ballot.status = status;
        ballot.void_reason = reason;
        Ok(ballot.clone())
    }
}

impl TallyStore for MemoryStore {
    fn load_run(&self, election_id: &Uuid) -> Result<Option<TallyRun>> {
        Ok(self.read()?.runs.get(election_id).cloned())
    }

    fn save_run(&self, run: &TallyRun) -> Result<()> {
        self.write()?.runs.insert(run.election_id, run.clone());
        Ok(())
    }

    fn replace_tally(&self, run: &TallyRun, rows: &[TallyRow]) -> Result<()> {
        let mut state = self.write()?;
        state.rows.remove(&run.id);
        state.rows.insert(run.id, rows.to_vec());
        state.runs.insert(run.election_id, run.clone());
        Ok(())
    }

    fn load_rows(&self, run_id: &Uuid) -> Result<Vec<TallyRow>> {
        Ok(self.read()?.rows.get(run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BallotKind, ClientMeta, SlateStatus, TallyStatus, VotingMode};
    use chrono::Utc;

    fn seeded() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let election_id = Uuid::new_v4();
        store
            .insert_election(Election {
                id: election_id,
                name: "Store Test".to_string(),
                status: ElectionStatus::InProgress,
                phase: ElectionPhase::Voting,
                voting_window: None,
            })
            .unwrap();
        (store, election_id)
    }

    fn ballot(election_id: Uuid, fingerprint: &str) -> Ballot {
        Ballot {
            id: Uuid::new_v4(),
            election_id,
            kind: BallotKind::Blank,
            status: BallotStatus::Confirmed,
            mode: VotingMode::Remote,
            voter_fingerprint: "v".repeat(64),
            vote_fingerprint: fingerprint.to_string(),
            slate_id: None,
            cast_at: Utc::now(),
            receipt: "RCPT-TEST".to_string(),
            client: ClientMeta::default(),
            void_reason: None,
        }
    }

    #[test]
    fn test_record_ballot_flips_has_voted_once() {
        let (store, election_id) = seeded();
        let voter_id = Uuid::new_v4();
        store.register_voter(Voter::apt(election_id, voter_id)).unwrap();

        store
            .record_ballot(&voter_id, ballot(election_id, &"a".repeat(64)))
            .unwrap();

        let voter = store.get_voter(&election_id, &voter_id).unwrap().unwrap();
        assert!(voter.has_voted);
        assert_eq!(voter.receipt.as_deref(), Some("RCPT-TEST"));

        let second = store.record_ballot(&voter_id, ballot(election_id, &"b".repeat(64)));
        assert!(matches!(second, Err(Error::AlreadyVoted)));
        assert_eq!(store.ballots(&election_id).unwrap().len(), 1);
        assert!(!store.vote_fingerprint_exists(&"b".repeat(64)).unwrap());
    }

    #[test]
    fn test_duplicate_vote_fingerprint_writes_nothing() {
        let (store, election_id) = seeded();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.register_voter(Voter::apt(election_id, first)).unwrap();
        store.register_voter(Voter::apt(election_id, second)).unwrap();

        let fp = "c".repeat(64);
        store.record_ballot(&first, ballot(election_id, &fp)).unwrap();
        let err = store.record_ballot(&second, ballot(election_id, &fp));

        assert!(matches!(err, Err(Error::Storage { .. })));
        let voter = store.get_voter(&election_id, &second).unwrap().unwrap();
        assert!(!voter.has_voted);
    }

    #[test]
    fn test_voter_counts() {
        let (store, election_id) = seeded();
        let voted = Uuid::new_v4();
        store.register_voter(Voter::apt(election_id, voted)).unwrap();
        store.register_voter(Voter::apt(election_id, Uuid::new_v4())).unwrap();
        store
            .register_voter(Voter::disqualified(election_id, Uuid::new_v4(), "dues"))
            .unwrap();
        store
            .record_ballot(&voted, ballot(election_id, &"d".repeat(64)))
            .unwrap();

        assert_eq!(store.count_registered(&election_id).unwrap(), 3);
        assert_eq!(store.count_eligible(&election_id).unwrap(), 2);
        assert_eq!(store.count_voted(&election_id).unwrap(), 1);
        assert_eq!(store.count_eligible(&Uuid::new_v4()).unwrap(), 0);

        let voters = store.list_voters(&election_id).unwrap();
        assert_eq!(voters.len(), 3);
        assert!(voters.windows(2).all(|pair| pair[0].voter_id < pair[1].voter_id));
        assert_eq!(voters.iter().filter(|v| v.has_voted).count(), 1);
        assert!(store.list_voters(&Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn test_approved_slates_keep_directory_order() {
        let (store, election_id) = seeded();
        for (number, status) in [
            (3, SlateStatus::Approved),
            (1, SlateStatus::Rejected),
            (2, SlateStatus::Approved),
        ] {
            store
                .insert_slate(Slate {
                    id: Uuid::new_v4(),
                    election_id,
                    number,
                    name: format!("Slate {number}"),
                    status,
                })
                .unwrap();
        }

        let numbers: Vec<u32> = store
            .list_approved_slates(&election_id)
            .unwrap()
            .iter()
            .map(|slate| slate.number)
            .collect();
        assert_eq!(numbers, vec![3, 2]);
    }

    #[test]
    fn test_replace_tally_discards_old_rows() {
        let (store, election_id) = seeded();
        let run = TallyRun::new(election_id, TallyStatus::InProgress);
        let row = |votes| TallyRow {
            run_id: run.id,
            slate_id: Uuid::new_v4(),
            slate_number: 1,
            slate_name: "A".to_string(),
            votes,
            share_of_counted: Default::default(),
            share_of_valid: Default::default(),
            rank: 1,
            elected: true,
        };

        store.replace_tally(&run, &[row(1), row(2)]).unwrap();
        store.replace_tally(&run, &[row(3)]).unwrap();

        let rows = store.load_rows(&run.id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].votes, 3);
        assert_eq!(store.load_run(&election_id).unwrap().unwrap().id, run.id);
    }

    #[test]
    fn test_snapshot_restores_state() {
        let (store, election_id) = seeded();
        let voter_id = Uuid::new_v4();
        store.register_voter(Voter::apt(election_id, voter_id)).unwrap();
        let fp = "e".repeat(64);
        store.record_ballot(&voter_id, ballot(election_id, &fp)).unwrap();

        let path = std::env::temp_dir().join(format!("apuration-{}.json", Uuid::new_v4()));
        store.save_to(&path).unwrap();
        let restored = MemoryStore::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(restored.find_by_vote_fingerprint(&fp).unwrap().is_some());
        assert!(
            restored
                .get_voter(&election_id, &voter_id)
                .unwrap()
                .unwrap()
                .has_voted
        );
    }
}
