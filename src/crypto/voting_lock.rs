//! Keyed mutual exclusion for casting and tallying
//!
//! Casting is serialized per (election, voter) and fully parallel across
//! voters; tally writes are serialized per election. Entries are created on
//! demand and dropped by [`LockJanitor`] once nobody holds them.

use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Registry of named locks
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Snapshot of the lock registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    pub tracked_keys: usize,
    pub held_keys: usize,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key serializing casts of one voter in one election
    pub fn voter_key(election_id: &Uuid, voter_id: &Uuid) -> String {
        format!("voting_lock:{election_id}:{voter_id}")
    }

    /// Key serializing tally writes for one election
    pub fn tally_key(election_id: &Uuid) -> String {
        format!("tally_lock:{election_id}")
    }

    fn entry(&self, key: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::internal("Lock registry write error"))?;

        Ok(locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Run `f` while holding the lock named `key`
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let entry = self.entry(key)?;
        let _guard = entry
            .lock()
            .map_err(|_| Error::internal(format!("Lock {key} poisoned")))?;
        f()
    }

    /// Drop entries nobody currently holds or waits on
    pub fn prune_idle(&self) -> Result<usize> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::internal("Lock registry write error"))?;

        let initial_count = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(initial_count - locks.len())
    }

    pub fn stats(&self) -> Result<LockStats> {
        let locks = self
            .locks
            .lock()
            .map_err(|_| Error::internal("Lock registry read error"))?;

        Ok(LockStats {
            tracked_keys: locks.len(),
            held_keys: locks
                .values()
                .filter(|lock| Arc::strong_count(lock) > 1)
                .count(),
        })
    }
}

/// `tokio::time::interval` panics on a zero period
const MIN_PRUNE_INTERVAL: Duration = Duration::from_millis(1);

/// Background task pruning idle lock entries
pub struct LockJanitor {
    locks: Arc<KeyedLocks>,
    stop_signal: tokio::sync::mpsc::Receiver<()>,
    prune_interval: Duration,
}

impl LockJanitor {
    /// A zero `prune_interval` is raised to one millisecond
    pub fn new(
        locks: Arc<KeyedLocks>,
        prune_interval: Duration,
        stop_signal: tokio::sync::mpsc::Receiver<()>,
    ) -> Self {
        Self {
            locks,
            stop_signal,
            prune_interval: prune_interval.max(MIN_PRUNE_INTERVAL),
        }
    }

    /// Run until a stop signal arrives or its sender is dropped
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.prune_interval);

        tracing::info!(
            "🧹 Lock janitor started (interval: {:?})",
            self.prune_interval
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.locks.prune_idle() {
                        Ok(0) => {}
                        Ok(pruned) => tracing::debug!("🧹 Pruned {} idle locks", pruned),
                        Err(e) => tracing::error!("❌ Lock pruning failed: {}", e),
                    }
                }
                _ = self.stop_signal.recv() => {
                    tracing::info!("🛑 Lock janitor stopping");
                    break;
                }
            }
        }

        tracing::info!("✅ Lock janitor stopped");
    }
}
