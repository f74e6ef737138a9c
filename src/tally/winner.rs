//! Winner resolution over an aggregated tally

use crate::types::{Percentage, TallyRow, TallyRun};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The rank-1 slate and how decisively it won
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerResolution {
    pub slate_id: Uuid,
    pub slate_number: u32,
    pub slate_name: String,
    pub votes: u64,
    pub share_of_valid: Percentage,
    /// Votes ahead of the runner-up (all votes when unopposed)
    pub margin_votes: u64,
    /// Share-of-valid points ahead of the runner-up
    pub margin_points: Percentage,
    /// More than half of the valid ballots
    pub won_by_majority: bool,
    /// Runner-up has the same vote count; rank 1 came from the tie-break rule
    pub tied: bool,
}

/// Resolve the winner of `run` from its rows
///
/// `None` when there are no slates or the leader received no votes.
pub fn resolve_winner(run: &TallyRun, rows: &[TallyRow]) -> Option<WinnerResolution> {
    let mut ranked: Vec<&TallyRow> = rows.iter().collect();
    ranked.sort_by_key(|row| row.rank);

    let leader = *ranked.first()?;
    if leader.votes == 0 {
        return None;
    }
    let runner_up = ranked.get(1).copied();

    let (margin_votes, margin_points, tied) = match runner_up {
        Some(second) => (
            leader.votes.saturating_sub(second.votes),
            leader.share_of_valid.saturating_sub(second.share_of_valid),
            second.votes == leader.votes,
        ),
        None => (leader.votes, leader.share_of_valid, false),
    };

    Some(WinnerResolution {
        slate_id: leader.slate_id,
        slate_number: leader.slate_number,
        slate_name: leader.slate_name.clone(),
        votes: leader.votes,
        share_of_valid: leader.share_of_valid,
        margin_votes,
        margin_points,
        won_by_majority: leader.votes * 2 > run.valid,
        tied,
    })
}
