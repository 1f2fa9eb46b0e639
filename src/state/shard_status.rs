use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// How a shard's most recent cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum CycleOutcome {
    Updated,
    NotModified,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardStatus {
    pub shard_id: i64,
    pub realm: String,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Last cycle result per shard. Written by the poll loop, read by the API.
#[derive(Default)]
pub struct ShardStatusStore {
    statuses: DashMap<i64, ShardStatus>,
}

impl ShardStatusStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, status: ShardStatus) {
        self.statuses.insert(status.shard_id, status);
    }

    pub fn get(&self, shard_id: i64) -> Option<ShardStatus> {
        self.statuses.get(&shard_id).map(|s| s.value().clone())
    }

    /// Snapshot ordered by shard id.
    pub fn all(&self) -> Vec<ShardStatus> {
        let mut out: Vec<ShardStatus> = self.statuses.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.shard_id);
        out
    }

    pub fn failed_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|e| matches!(e.value().outcome, CycleOutcome::Failed(_)))
            .count()
    }
}
