//! Integrity fingerprint over an aggregated tally
//!
//! The digest covers the election id, the valid/blank/null counts and each
//! row's (slate id, votes) sorted by slate id, so row order never matters
//! and any change to a counted ballot changes the result. Percentages, ranks
//! and timestamps are derived data and stay out of the digest.

use crate::crypto::CryptoUtils;
use crate::types::{Fingerprint, TallyRow, TallyRun};
use crate::{Error, Result};

const DOMAIN_TAG: &[u8] = b"apuration/tally/v1";

pub struct IntegrityCertifier;

impl IntegrityCertifier {
    /// Deterministic hex fingerprint of a run and its rows
    pub fn fingerprint(run: &TallyRun, rows: &[TallyRow]) -> Fingerprint {
        let mut entries: Vec<(&[u8; 16], u64)> = rows
            .iter()
            .map(|row| (row.slate_id.as_bytes(), row.votes))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_TAG);
        hasher.update(run.election_id.as_bytes());
        hasher.update(&run.valid.to_le_bytes());
        hasher.update(&run.blank.to_le_bytes());
        hasher.update(&run.null.to_le_bytes());
        hasher.update(&(entries.len() as u64).to_le_bytes());
        for (slate_id, votes) in entries {
            hasher.update(slate_id);
            hasher.update(&votes.to_le_bytes());
        }

        hasher.finalize().to_hex().to_string()
    }

    /// Compare a stored fingerprint with a fresh recomputation
    pub fn verify(stored: &str, recomputed: &str) -> Result<()> {
        if CryptoUtils::fingerprints_match(stored, recomputed) {
            Ok(())
        } else {
            Err(Error::IntegrityMismatch {
                stored: stored.to_string(),
                recomputed: recomputed.to_string(),
            })
        }
    }
}
