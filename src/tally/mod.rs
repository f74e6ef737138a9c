//! Tally aggregation, integrity fingerprinting and winner resolution

pub mod aggregator;
pub mod certifier;
pub mod lifecycle;
pub mod winner;

pub use aggregator::{Tally, TallyAggregator, VotingStatistics, build_tally, rank_rows};
pub use certifier::IntegrityCertifier;
pub use lifecycle::{Transition, next_status};
pub use winner::{WinnerResolution, resolve_winner};
