//! Concurrent casting and tallying

mod common;

use apuration::{
    Error, Result,
    store::VoterRegistry,
    tally::IntegrityCertifier,
    types::{ElectionPhase, ElectionStatus},
};
use common::ElectionFixture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_casts_by_one_voter_accept_exactly_one() -> Result<()> {
    println!("🔒 Testing at-most-one-vote under concurrency...");

    let fixture = Arc::new(ElectionFixture::new(1, 2)?);
    let accepted = Arc::new(AtomicUsize::new(0));
    let already_voted = Arc::new(AtomicUsize::new(0));
    let attempts = 16;

    let mut handles = Vec::new();
    for i in 0..attempts {
        let fixture = fixture.clone();
        let accepted = accepted.clone();
        let already_voted = already_voted.clone();

        handles.push(tokio::spawn(async move {
            match fixture.vote_for(0, i % 2) {
                Ok(_) => {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
                Err(Error::AlreadyVoted) => {
                    already_voted.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => panic!("Unexpected cast failure: {e}"),
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let accepted = accepted.load(Ordering::SeqCst);
    let already_voted = already_voted.load(Ordering::SeqCst);
    println!("✅ Accepted: {accepted}, AlreadyVoted: {already_voted}");

    assert_eq!(accepted, 1);
    assert_eq!(already_voted, attempts - 1);

    let tally = fixture.apuration.aggregate(&fixture.election_id)?;
    assert_eq!(tally.run.total_counted(), 1);
    assert_eq!(fixture.store.count_voted(&fixture.election_id)?, 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_different_voters_all_succeed() -> Result<()> {
    println!("👥 Testing parallel casting across voters...");

    let voters = 60;
    let fixture = Arc::new(ElectionFixture::new(voters, 3)?);

    let mut handles = Vec::new();
    for voter in 0..voters {
        let fixture = fixture.clone();
        handles.push(tokio::spawn(async move { fixture.vote_for(voter, voter % 3) }));
    }

    let mut fingerprints = std::collections::HashSet::new();
    for handle in handles {
        let receipt = handle.await.unwrap()?;
        assert!(fingerprints.insert(receipt.vote_fingerprint));
    }

    let tally = fixture.apuration.aggregate(&fixture.election_id)?;
    assert_eq!(tally.run.voted, voters as u64);
    assert_eq!(tally.run.valid, voters as u64);
    assert!(tally.rows.iter().all(|row| row.votes == 20));
    println!("✅ {voters} voters cast in parallel, {} unique receipts", fingerprints.len());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_finalize_racing_with_casting_stays_consistent() -> Result<()> {
    println!("📊 Testing aggregation while ballots arrive...");

    let voters = 40;
    let fixture = Arc::new(ElectionFixture::new(voters, 2)?);
    fixture.apuration.start(&fixture.election_id)?;

    // Casting is closed once tallying starts; reopen the voting phase so
    // ballots keep arriving while aggregation runs
    fixture
        .store
        .set_phase(&fixture.election_id, ElectionPhase::Voting)?;
    fixture
        .store
        .set_status(&fixture.election_id, ElectionStatus::InProgress)?;

    let mut casts = Vec::new();
    for voter in 0..voters {
        let fixture = fixture.clone();
        casts.push(tokio::spawn(async move { fixture.vote_for(voter, voter % 2) }));
    }
    let mut passes = Vec::new();
    for _ in 0..5 {
        let fixture = fixture.clone();
        passes.push(tokio::spawn(async move {
            fixture.apuration.aggregate(&fixture.election_id)
        }));
    }

    for handle in casts {
        handle.await.unwrap()?;
    }
    for handle in passes {
        let tally = handle.await.unwrap()?;
        assert_eq!(
            tally.rows.iter().map(|row| row.votes).sum::<u64>(),
            tally.run.valid
        );
    }

    // Every pass recomputes from scratch, so a final pass sees all ballots
    let run = fixture.apuration.finalize(&fixture.election_id)?;
    let report = fixture.apuration.full_tally(&fixture.election_id)?;
    assert_eq!(run.valid, voters as u64);
    assert_eq!(
        report.rows.iter().map(|row| row.votes).sum::<u64>(),
        run.valid
    );
    assert_eq!(
        run.fingerprint,
        Some(IntegrityCertifier::fingerprint(&report.run, &report.rows))
    );

    Ok(())
}
