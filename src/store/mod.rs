//! Storage seams consumed by the pipeline
//!
//! Elections, slates and voters are owned by other services and read through
//! [`ElectionDirectory`] and [`VoterRegistry`]. Ballots and tally results are
//! owned here and persisted through [`BallotStore`] and [`TallyStore`].
//! Every record is scoped by election id; nothing is shared across elections.

pub mod memory;

use crate::Result;
use crate::types::{Ballot, BallotStatus, Election, Slate, TallyRow, TallyRun, Voter};
use std::sync::Arc;
use uuid::Uuid;

pub use memory::MemoryStore;

/// Read access to elections and their slates
pub trait ElectionDirectory: Send + Sync {
    fn get_election(&self, election_id: &Uuid) -> Result<Option<Election>>;

    /// All slates of an election, in directory order
    fn list_slates(&self, election_id: &Uuid) -> Result<Vec<Slate>>;

    /// Approved slates only, in directory order
    fn list_approved_slates(&self, election_id: &Uuid) -> Result<Vec<Slate>> {
        Ok(self
            .list_slates(election_id)?
            .into_iter()
            .filter(Slate::is_tally_eligible)
            .collect())
    }

    /// Move the election into its tallying phase
    fn begin_tallying(&self, election_id: &Uuid) -> Result<()>;
}

/// Per-election voter records
pub trait VoterRegistry: Send + Sync {
    fn get_voter(&self, election_id: &Uuid, voter_id: &Uuid) -> Result<Option<Voter>>;

    /// Voters flagged apt
    fn count_eligible(&self, election_id: &Uuid) -> Result<u64>;

    /// Voters whose has-voted flag is set
    fn count_voted(&self, election_id: &Uuid) -> Result<u64>;

    /// All registered voters, apt or not
    fn count_registered(&self, election_id: &Uuid) -> Result<u64>;

    /// Every voter record of an election, ordered by voter id
    fn list_voters(&self, election_id: &Uuid) -> Result<Vec<Voter>>;
}

/// Ballot persistence
pub trait BallotStore: Send + Sync {
    /// Insert a confirmed ballot and flip the voter's has-voted flag as one unit
    ///
    /// Fails with `AlreadyVoted` if the flag is already set and with a storage
    /// error if the vote fingerprint is taken. Nothing is written on failure.
    fn record_ballot(&self, voter_id: &Uuid, ballot: Ballot) -> Result<()>;

    fn vote_fingerprint_exists(&self, vote_fingerprint: &str) -> Result<bool>;

    fn get_ballot(&self, ballot_id: &Uuid) -> Result<Option<Ballot>>;

    fn find_by_vote_fingerprint(&self, vote_fingerprint: &str) -> Result<Option<Ballot>>;

    /// Every ballot of an election, confirmed or voided
    fn ballots(&self, election_id: &Uuid) -> Result<Vec<Ballot>>;

    /// Change a ballot's status, returning the updated ballot
    fn set_ballot_status(
        &self,
        ballot_id: &Uuid,
        status: BallotStatus,
        reason: Option<String>,
    ) -> Result<Ballot>;
}

/// Tally run and row persistence
pub trait TallyStore: Send + Sync {
    /// The authoritative run of an election, if any
    fn load_run(&self, election_id: &Uuid) -> Result<Option<TallyRun>>;

    fn save_run(&self, run: &TallyRun) -> Result<()>;

    /// Save the run and replace its full row set in one write
    ///
    /// Previous rows of the run are discarded before the new ones land.
    fn replace_tally(&self, run: &TallyRun, rows: &[TallyRow]) -> Result<()>;

    fn load_rows(&self, run_id: &Uuid) -> Result<Vec<TallyRow>>;
}

/// Handles to every storage seam, shared by the pipeline components
#[derive(Clone)]
pub struct Stores {
    pub elections: Arc<dyn ElectionDirectory>,
    pub voters: Arc<dyn VoterRegistry>,
    pub ballots: Arc<dyn BallotStore>,
    pub tallies: Arc<dyn TallyStore>,
}

impl Stores {
    /// Use one backend for every seam
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ElectionDirectory + VoterRegistry + BallotStore + TallyStore + 'static,
    {
        Self {
            elections: store.clone(),
            voters: store.clone(),
            ballots: store.clone(),
            tallies: store,
        }
    }
}
