//! Legal moves of a tally run
//!
//! ```text
//! NotStarted -> InProgress <-> Paused
//!               InProgress -> Completed -> Certified
//!   InProgress | Completed -> Contested
//!                        * -> Annulled
//! ```
//!
//! The table is pure: it never touches storage, so the apuration service can
//! check legality before doing any work and leave the run untouched on refusal.

use crate::types::TallyStatus;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A requested lifecycle action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Finalize,
    Certify,
    Reprocess,
    Contest,
    Annul,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Finalize => "finalize",
            Self::Certify => "certify",
            Self::Reprocess => "reprocess",
            Self::Contest => "contest",
            Self::Annul => "annul",
        };
        f.write_str(name)
    }
}

/// Resolve the status a run ends up in after `action`, or the refusal
///
/// `Reprocess` resolves to `InProgress`: the caller re-runs the finalize
/// pipeline from there.
pub fn next_status(from: TallyStatus, action: Transition) -> Result<TallyStatus> {
    use TallyStatus::*;
    use Transition::*;

    let to = match (from, action) {
        (NotStarted | Paused, Start) => InProgress,
        (InProgress, Pause) => Paused,
        (Paused, Resume) => InProgress,
        (InProgress, Finalize) => Completed,
        (Completed, Certify) => Certified,
        (Certified, Reprocess) => return Err(Error::AlreadyCertified),
        (InProgress | Paused | Completed | Contested, Reprocess) => InProgress,
        (InProgress | Completed, Contest) => Contested,
        (status, Annul) if status != Annulled => Annulled,
        _ => return Err(Error::InvalidTransition { from, action }),
    };
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [TallyStatus; 7] = [
        TallyStatus::NotStarted,
        TallyStatus::InProgress,
        TallyStatus::Paused,
        TallyStatus::Completed,
        TallyStatus::Certified,
        TallyStatus::Contested,
        TallyStatus::Annulled,
    ];

    #[test]
    fn test_happy_path() {
        let mut status = TallyStatus::NotStarted;
        for action in [
            Transition::Start,
            Transition::Pause,
            Transition::Resume,
            Transition::Finalize,
            Transition::Certify,
        ] {
            status = next_status(status, action).unwrap();
        }
        assert_eq!(status, TallyStatus::Certified);
    }

    #[test]
    fn test_certify_only_from_completed() {
        for from in ALL_STATUSES {
            let result = next_status(from, Transition::Certify);
            if from == TallyStatus::Completed {
                assert_eq!(result.unwrap(), TallyStatus::Certified);
            } else {
                assert!(matches!(
                    result,
                    Err(Error::InvalidTransition {
                        action: Transition::Certify,
                        ..
                    })
                ));
            }
        }
    }

    #[test]
    fn test_reprocess_after_certify_is_refused() {
        assert!(matches!(
            next_status(TallyStatus::Certified, Transition::Reprocess),
            Err(Error::AlreadyCertified)
        ));
        assert!(matches!(
            next_status(TallyStatus::NotStarted, Transition::Reprocess),
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(
            next_status(TallyStatus::Contested, Transition::Reprocess).unwrap(),
            TallyStatus::InProgress
        );
    }

    #[test]
    fn test_pause_and_resume_legality() {
        assert!(next_status(TallyStatus::Completed, Transition::Pause).is_err());
        assert!(next_status(TallyStatus::InProgress, Transition::Resume).is_err());
        assert_eq!(
            next_status(TallyStatus::Paused, Transition::Start).unwrap(),
            TallyStatus::InProgress
        );
        assert!(next_status(TallyStatus::InProgress, Transition::Start).is_err());
    }

    #[test]
    fn test_contest_and_annul() {
        assert_eq!(
            next_status(TallyStatus::Completed, Transition::Contest).unwrap(),
            TallyStatus::Contested
        );
        assert!(next_status(TallyStatus::Paused, Transition::Contest).is_err());

        for from in ALL_STATUSES {
            let result = next_status(from, Transition::Annul);
            if from == TallyStatus::Annulled {
                assert!(result.is_err());
            } else {
                assert_eq!(result.unwrap(), TallyStatus::Annulled);
            }
        }
    }
}
