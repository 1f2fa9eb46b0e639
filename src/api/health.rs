//! Process-wide counters behind `/health`. The poll loop writes, the API reads.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    /// Rounds finished since startup.
    pub rounds_completed: AtomicU64,
    /// Unix seconds when the last round finished (0 = none yet).
    pub last_round_at: AtomicI64,
    /// Shards polled each round.
    pub shards_tracked: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_shards_tracked(&self, n: usize) {
        self.shards_tracked.store(n as u64, Ordering::Relaxed);
    }

    pub fn round_finished(&self, at_secs: i64) {
        self.last_round_at.store(at_secs, Ordering::Relaxed);
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Relaxed)
    }

    pub fn last_round_at(&self) -> Option<i64> {
        match self.last_round_at.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(secs),
        }
    }

    pub fn shards_tracked(&self) -> u64 {
        self.shards_tracked.load(Ordering::Relaxed)
    }
}
