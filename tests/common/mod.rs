//! Shared election fixtures for integration tests

#![allow(dead_code)]

use apuration::{
    Apuration, Result,
    recorder::CastBallot,
    store::{MemoryStore, Stores},
    types::{
        BallotKind, ClientMeta, Election, ElectionPhase, ElectionStatus, Receipt, Slate,
        SlateStatus, Voter, VotingMode,
    },
};
use std::sync::Arc;
use uuid::Uuid;

pub struct ElectionFixture {
    pub store: Arc<MemoryStore>,
    pub apuration: Arc<Apuration>,
    pub election_id: Uuid,
    /// Approved slates, by ballot number 1..
    pub slates: Vec<Uuid>,
    pub voters: Vec<Uuid>,
}

impl ElectionFixture {
    /// Open election with `voters` apt voters and `slates` approved slates
    pub fn new(voters: usize, slates: usize) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let election_id = Uuid::new_v4();
        store.insert_election(Election {
            id: election_id,
            name: "Professional Council 2026".to_string(),
            status: ElectionStatus::InProgress,
            phase: ElectionPhase::Voting,
            voting_window: None,
        })?;

        let mut slate_ids = Vec::new();
        for number in 1..=slates as u32 {
            let id = Uuid::new_v4();
            store.insert_slate(Slate {
                id,
                election_id,
                number,
                name: format!("Slate {number}"),
                status: SlateStatus::Approved,
            })?;
            slate_ids.push(id);
        }

        let mut voter_ids = Vec::new();
        for _ in 0..voters {
            let id = Uuid::new_v4();
            store.register_voter(Voter::apt(election_id, id))?;
            voter_ids.push(id);
        }

        let apuration = Arc::new(Apuration::for_testing(Stores::shared(store.clone())));

        Ok(Self {
            store,
            apuration,
            election_id,
            slates: slate_ids,
            voters: voter_ids,
        })
    }

    pub fn request(&self, voter: usize, kind: BallotKind, slate: Option<usize>) -> CastBallot {
        CastBallot {
            election_id: self.election_id,
            voter_id: self.voters[voter],
            kind,
            slate_id: slate.map(|index| self.slates[index]),
            mode: if voter % 2 == 0 {
                VotingMode::InPerson
            } else {
                VotingMode::Remote
            },
            client: ClientMeta {
                ip_address: Some("10.0.0.1".to_string()),
                user_agent: Some("integration-test".to_string()),
            },
        }
    }

    pub fn vote_for(&self, voter: usize, slate: usize) -> Result<Receipt> {
        self.apuration
            .cast_ballot(self.request(voter, BallotKind::SlateVote, Some(slate)))
    }

    pub fn vote_blank(&self, voter: usize) -> Result<Receipt> {
        self.apuration
            .cast_ballot(self.request(voter, BallotKind::Blank, None))
    }

    pub fn vote_null(&self, voter: usize) -> Result<Receipt> {
        self.apuration
            .cast_ballot(self.request(voter, BallotKind::Null, None))
    }
}
