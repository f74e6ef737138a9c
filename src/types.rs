//! # Core Types for the Apuration Pipeline
//!
//! This module defines the records that flow between ballot casting, tally
//! aggregation and certification. Elections, voters and slates are owned by
//! other services and reach this crate read-only through the storage seams in
//! [`crate::store`]; ballots, tally runs and tally rows are owned here.
//!
//! ## Type Categories
//!
//! ### Consumed read-only
//! - [`Election`]: status, phase and optional voting window
//! - [`Slate`]: a candidate list competing in an election
//! - [`Voter`]: per-election eligibility and has-voted flag
//!
//! ### Owned by the pipeline
//! - [`Ballot`]: one cast vote, anonymized and fingerprinted
//! - [`TallyRun`]: one lifecycle instance of counting an election
//! - [`TallyRow`]: the per-slate result line of a run
//! - [`Receipt`]: the voter-facing proof of cast
//!
//! ## Usage Examples
//!
//! ```rust
//! use apuration::types::{Election, ElectionPhase, ElectionStatus, VotingWindow};
//! use chrono::{Duration, Utc};
//! use uuid::Uuid;
//!
//! let now = Utc::now();
//! let election = Election {
//!     id: Uuid::new_v4(),
//!     name: "Regional Council 2026".to_string(),
//!     status: ElectionStatus::InProgress,
//!     phase: ElectionPhase::Voting,
//!     voting_window: Some(VotingWindow::between(now - Duration::hours(1), now + Duration::hours(8))),
//! };
//!
//! assert!(election.is_open_for_voting(now));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Hex-encoded one-way fingerprint (Blake3, 32 bytes -> 64 hex chars)
pub type Fingerprint = String;

/// Lifecycle status of an election as reported by election management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElectionStatus {
    Draft,
    Scheduled,
    InProgress,
    Tallying,
    Finalized,
    Suspended,
    Cancelled,
}

/// Calendar phase of an election, consumed from phase scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElectionPhase {
    Registration,
    Challenge,
    Campaign,
    Voting,
    Tallying,
    Result,
}

impl ElectionPhase {
    /// Parse a phase from its kebab-case name
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "registration" => Some(Self::Registration),
            "challenge" => Some(Self::Challenge),
            "campaign" => Some(Self::Campaign),
            "voting" => Some(Self::Voting),
            "tallying" => Some(Self::Tallying),
            "result" => Some(Self::Result),
            _ => None,
        }
    }
}

impl fmt::Display for ElectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registration => "registration",
            Self::Challenge => "challenge",
            Self::Campaign => "campaign",
            Self::Voting => "voting",
            Self::Tallying => "tallying",
            Self::Result => "result",
        };
        f.write_str(name)
    }
}

/// Optional bounds of the voting period; either side may be open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VotingWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl VotingWindow {
    /// Window with both bounds set
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Whether `now` lies within the configured bounds (inclusive)
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| now >= start) && self.end.is_none_or(|end| now <= end)
    }
}

/// Election record, owned by election management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    pub id: Uuid,
    pub name: String,
    pub status: ElectionStatus,
    pub phase: ElectionPhase,
    pub voting_window: Option<VotingWindow>,
}

impl Election {
    /// Check whether ballots may be accepted at `now`
    ///
    /// Requires the election to be in progress, in its voting phase, and,
    /// when a window is configured, `now` to fall inside it.
    pub fn is_open_for_voting(&self, now: DateTime<Utc>) -> bool {
        self.closed_reason(now).is_none()
    }

    /// Human-readable reason why voting is not open, or `None` when it is
    pub fn closed_reason(&self, now: DateTime<Utc>) -> Option<String> {
        if self.status != ElectionStatus::InProgress {
            return Some(format!("election status is {:?}", self.status));
        }
        if self.phase != ElectionPhase::Voting {
            return Some(format!("election is in its {} phase", self.phase));
        }
        match self.voting_window {
            Some(window) if !window.contains(now) => match (window.start, window.end) {
                (Some(start), _) if now < start => {
                    Some(format!("voting opens at {}", start.to_rfc3339()))
                }
                _ => Some("voting period has ended".to_string()),
            },
            _ => None,
        }
    }
}

/// Approval status of a slate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlateStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

/// A candidate list competing in an election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slate {
    pub id: Uuid,
    pub election_id: Uuid,
    /// Ballot number shown to voters
    pub number: u32,
    pub name: String,
    pub status: SlateStatus,
}

impl Slate {
    /// Only approved slates receive votes and appear in the tally
    pub fn is_tally_eligible(&self) -> bool {
        self.status == SlateStatus::Approved
    }
}

/// Voter record for one election
///
/// `has_voted` flips false -> true exactly once and is never reverted by
/// this crate, not even when the ballot is later voided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    pub election_id: Uuid,
    pub voter_id: Uuid,
    /// Eligibility flag (`apt`)
    pub apt: bool,
    pub disqualification_reason: Option<String>,
    pub has_voted: bool,
    pub voted_at: Option<DateTime<Utc>>,
    pub receipt: Option<String>,
}

impl Voter {
    /// Fresh apt voter who has not voted yet
    pub fn apt(election_id: Uuid, voter_id: Uuid) -> Self {
        Self {
            election_id,
            voter_id,
            apt: true,
            disqualification_reason: None,
            has_voted: false,
            voted_at: None,
            receipt: None,
        }
    }

    /// Voter barred from this election
    pub fn disqualified(election_id: Uuid, voter_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            apt: false,
            disqualification_reason: Some(reason.into()),
            ..Self::apt(election_id, voter_id)
        }
    }
}

/// What a ballot expresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BallotKind {
    SlateVote,
    Blank,
    Null,
}

/// Whether a ballot counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BallotStatus {
    Confirmed,
    Voided,
}

/// How the ballot was cast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VotingMode {
    InPerson,
    Remote,
}

/// Client metadata captured with a cast, kept for audit only
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One cast vote
///
/// The voter is referenced only through `voter_fingerprint`, a salted one-way
/// hash; nothing in a ballot leads back to the voter id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub id: Uuid,
    pub election_id: Uuid,
    pub kind: BallotKind,
    pub status: BallotStatus,
    pub mode: VotingMode,
    pub voter_fingerprint: Fingerprint,
    /// Unique per election, receipt-bearing
    pub vote_fingerprint: Fingerprint,
    /// `Some` only when `kind == SlateVote`
    pub slate_id: Option<Uuid>,
    pub cast_at: DateTime<Utc>,
    pub receipt: String,
    pub client: ClientMeta,
    pub void_reason: Option<String>,
}

impl Ballot {
    /// Confirmed ballots count in exactly one bucket; voided ones in none
    pub fn is_counted(&self) -> bool {
        self.status == BallotStatus::Confirmed
    }
}

/// Proof of cast returned to the voter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_code: String,
    pub vote_fingerprint: Fingerprint,
    pub cast_at: DateTime<Utc>,
    pub election_id: Uuid,
    pub election_name: String,
    pub slate_name: Option<String>,
    pub mode: VotingMode,
}

/// Lifecycle status of a tally run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TallyStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Certified,
    Contested,
    Annulled,
}

impl fmt::Display for TallyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::InProgress => "in-progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Certified => "certified",
            Self::Contested => "contested",
            Self::Annulled => "annulled",
        };
        f.write_str(name)
    }
}

/// A percentage held as exact hundredths of a percent (basis points)
///
/// All tally percentages are rounded to two decimals, half-up, from integer
/// counts; keeping them as integers makes recomputation bit-for-bit stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Percentage(u32);

impl Percentage {
    pub const ZERO: Self = Self(0);
    pub const HUNDRED: Self = Self(10_000);

    /// `part / whole * 100`, rounded half-up to two decimals; 0 when `whole` is 0
    pub fn from_ratio(part: u64, whole: u64) -> Self {
        if whole == 0 {
            return Self::ZERO;
        }
        let whole = whole as u128;
        let rounded = (part as u128 * 20_000 + whole) / (2 * whole);
        Self(rounded.min(u32::MAX as u128) as u32)
    }

    /// `100 - self`, floored at zero
    pub fn complement(self) -> Self {
        Self(Self::HUNDRED.0.saturating_sub(self.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Certification metadata attached to a run once it is made official
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certification {
    pub certified_by: String,
    pub certified_at: DateTime<Utc>,
    /// Hex Ed25519 signature over the integrity fingerprint
    pub signature: String,
    /// Hex Ed25519 public key that produced `signature`
    pub public_key: String,
}

/// One lifecycle instance of counting an election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyRun {
    pub id: Uuid,
    pub election_id: Uuid,
    pub status: TallyStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,

    pub eligible: u64,
    pub voted: u64,
    pub abstentions: u64,
    pub valid: u64,
    pub blank: u64,
    pub null: u64,
    pub voided: u64,
    pub participation: Percentage,
    pub abstention: Percentage,

    pub winning_slate_id: Option<Uuid>,
    pub winning_slate_votes: Option<u64>,
    pub fingerprint: Option<Fingerprint>,

    pub certification: Option<Certification>,
    pub contest_reason: Option<String>,
    pub annul_reason: Option<String>,
    pub aggregated_at: Option<DateTime<Utc>>,
}

impl TallyRun {
    /// Empty run for an election; counts are filled by aggregation
    pub fn new(election_id: Uuid, status: TallyStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            election_id,
            status,
            started_at: None,
            ended_at: None,
            paused_at: None,
            pause_reason: None,
            eligible: 0,
            voted: 0,
            abstentions: 0,
            valid: 0,
            blank: 0,
            null: 0,
            voided: 0,
            participation: Percentage::ZERO,
            abstention: Percentage::ZERO,
            winning_slate_id: None,
            winning_slate_votes: None,
            fingerprint: None,
            certification: None,
            contest_reason: None,
            annul_reason: None,
            aggregated_at: None,
        }
    }

    /// Confirmed ballots in any bucket
    pub fn total_counted(&self) -> u64 {
        self.valid + self.blank + self.null
    }

    pub fn is_certified(&self) -> bool {
        self.certification.is_some()
    }
}

/// Per-slate result line within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyRow {
    pub run_id: Uuid,
    pub slate_id: Uuid,
    pub slate_number: u32,
    pub slate_name: String,
    pub votes: u64,
    /// Share of all counted ballots (valid + blank + null)
    pub share_of_counted: Percentage,
    /// Share of valid (slate) ballots
    pub share_of_valid: Percentage,
    /// 1-based position
    pub rank: u32,
    /// True only at rank 1
    pub elected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn election(status: ElectionStatus, phase: ElectionPhase) -> Election {
        Election {
            id: Uuid::new_v4(),
            name: "Test Election".to_string(),
            status,
            phase,
            voting_window: None,
        }
    }

    #[test]
    fn test_voting_window_bounds() {
        let now = Utc::now();
        let window = VotingWindow::between(now - Duration::hours(1), now + Duration::hours(1));
        assert!(window.contains(now));
        assert!(!window.contains(now - Duration::hours(2)));
        assert!(!window.contains(now + Duration::hours(2)));

        let open_ended = VotingWindow {
            start: Some(now - Duration::hours(1)),
            end: None,
        };
        assert!(open_ended.contains(now + Duration::days(30)));
    }

    #[test]
    fn test_election_open_for_voting() {
        let now = Utc::now();
        let open = election(ElectionStatus::InProgress, ElectionPhase::Voting);
        assert!(open.is_open_for_voting(now));

        let campaign = election(ElectionStatus::InProgress, ElectionPhase::Campaign);
        assert!(campaign.closed_reason(now).unwrap().contains("campaign"));

        let suspended = election(ElectionStatus::Suspended, ElectionPhase::Voting);
        assert!(!suspended.is_open_for_voting(now));

        let future = Election {
            voting_window: Some(VotingWindow::between(
                now + Duration::hours(1),
                now + Duration::hours(2),
            )),
            ..open.clone()
        };
        assert!(future.closed_reason(now).unwrap().starts_with("voting opens at"));

        let ended = Election {
            voting_window: Some(VotingWindow::between(
                now - Duration::hours(2),
                now - Duration::hours(1),
            )),
            ..open
        };
        assert_eq!(ended.closed_reason(now).unwrap(), "voting period has ended");
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(Percentage::from_ratio(6, 10).to_string(), "60.00");
        assert_eq!(Percentage::from_ratio(4, 5).to_string(), "80.00");
        assert_eq!(Percentage::from_ratio(2, 3).to_string(), "66.67");
        assert_eq!(Percentage::from_ratio(1, 3).to_string(), "33.33");
        assert_eq!(Percentage::from_ratio(1, 8).to_string(), "12.50");
        // 1/16 = 6.25 exactly; 1/160000 = 0.000625 rounds to 0.00
        assert_eq!(Percentage::from_ratio(1, 16).to_string(), "6.25");
        assert_eq!(Percentage::from_ratio(1, 160_000), Percentage::ZERO);
        // 1/20000 = 0.005 rounds half-up to 0.01
        assert_eq!(Percentage::from_ratio(1, 20_000).to_string(), "0.01");
        assert_eq!(Percentage::from_ratio(5, 0), Percentage::ZERO);
    }

    #[test]
    fn test_percentage_complement() {
        let participation = Percentage::from_ratio(6, 10);
        assert_eq!(participation.complement().to_string(), "40.00");
        assert_eq!(Percentage::HUNDRED.complement(), Percentage::ZERO);
    }

    #[test]
    fn test_phase_parse_round_trip_names() {
        assert_eq!(ElectionPhase::parse(" Tallying "), Some(ElectionPhase::Tallying));
        assert_eq!(ElectionPhase::parse("result"), Some(ElectionPhase::Result));
        assert_eq!(ElectionPhase::parse("counting"), None);
        assert_eq!(ElectionPhase::Voting.to_string(), "voting");
    }
}
