use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::Shard;
use crate::error::Result;
use crate::shard_update::ShardUpdater;
use crate::state::{CycleOutcome, ShardStatus, ShardStatusStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub updated: usize,
    pub not_modified: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Polls every shard once per cadence. Rounds never overlap: a round waits
/// for all of its shard cycles before the next tick is awaited.
pub struct PollLoop {
    updater: Arc<ShardUpdater>,
    shards: Vec<Shard>,
    cadence: Duration,
    max_concurrent: usize,
    status: Arc<ShardStatusStore>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl PollLoop {
    pub fn new(
        updater: Arc<ShardUpdater>,
        shards: Vec<Shard>,
        cadence: Duration,
        max_concurrent: usize,
        status: Arc<ShardStatusStore>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        health.set_shards_tracked(shards.len());
        Self {
            updater,
            shards,
            cadence,
            max_concurrent: max_concurrent.max(1),
            status,
            health,
            latency,
        }
    }

    /// Run rounds until `cancel` fires. A round in progress finishes first.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_round().await;
            info!(
                updated = report.updated,
                not_modified = report.not_modified,
                failed = report.failed,
                elapsed_ms = report.elapsed.as_millis() as u64,
                sleep_ms = self.cadence.saturating_sub(report.elapsed).as_millis() as u64,
                "Round complete"
            );
        }
        info!("Poll loop stopped");
    }

    /// One cycle per shard, concurrently, bounded by `max_concurrent`. A
    /// failing shard is logged and counted; the others still run.
    pub async fn run_round(&self) -> RoundReport {
        let started = Instant::now();
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<(Shard, Result<bool>, Duration)> = JoinSet::new();

        for shard in self.shards.iter().cloned() {
            let updater = Arc::clone(&self.updater);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let cycle_started = Instant::now();
                let result = updater.try_update_shard(&shard).await;
                (shard, result, cycle_started.elapsed())
            });
        }

        let mut report = RoundReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (shard, result, took) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Shard task panicked: {e}");
                    report.failed += 1;
                    continue;
                }
            };

            let outcome = match result {
                Ok(true) => {
                    report.updated += 1;
                    CycleOutcome::Updated
                }
                Ok(false) => {
                    report.not_modified += 1;
                    CycleOutcome::NotModified
                }
                Err(e) => {
                    error!(shard_id = shard.id, realm = %shard.realm, "Shard update failed: {e}");
                    report.failed += 1;
                    CycleOutcome::Failed(e.to_string())
                }
            };

            self.latency.record(took);
            self.status.record(ShardStatus {
                shard_id: shard.id,
                realm: shard.realm,
                outcome,
                finished_at: Utc::now(),
                duration_ms: took.as_millis() as u64,
            });
        }

        report.elapsed = started.elapsed();
        self.health.round_finished(Utc::now().timestamp());
        report
    }
}

#[cfg(test)]
mod tests {
    use sqlx::SqlitePool;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::db::{memory_pool, queries, BatchWriter};
    use crate::fetcher::tests::{fetcher, mount_oauth};

    const BODY: &str =
        r#"{"auctions":[{"id":1,"item":{"id":2589},"quantity":10,"unit_price":100,"time_left":"LONG"}]}"#;

    async fn poll_loop(server: &MockServer, pool: &SqlitePool, shards: Vec<Shard>) -> PollLoop {
        let updater = ShardUpdater::new(
            pool.clone(),
            Arc::new(fetcher(server)),
            BatchWriter::new(pool.clone(), 5000),
            "en_GB".to_string(),
        );
        PollLoop::new(
            Arc::new(updater),
            shards,
            Duration::from_millis(50),
            2,
            ShardStatusStore::new(),
            Arc::new(HealthState::new()),
            Arc::new(LatencyStats::new()),
        )
    }

    #[tokio::test]
    async fn one_failing_shard_does_not_stop_the_round() {
        let server = MockServer::start().await;
        mount_oauth(&server).await;
        Mock::given(method("GET"))
            .and(path("/data/wow/connected-realm/1305/auctions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Last-Modified", "Fri, 01 Mar 2024 13:00:00 GMT")
                    .set_body_string(BODY),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/wow/connected-realm/1096/auctions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/wow/connected-realm/3702/auctions"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let pool = memory_pool().await;
        let ragnaros = queries::insert_shard(&pool, 1305, "eu", "ragnaros", "Ragnaros").await.unwrap();
        let aerie = queries::insert_shard(&pool, 1096, "eu", "aerie-peak", "Aerie Peak").await.unwrap();
        let argent = queries::insert_shard(&pool, 3702, "eu", "argent-dawn", "Argent Dawn").await.unwrap();
        let lp = poll_loop(&server, &pool, vec![ragnaros.clone(), aerie.clone(), argent.clone()]).await;

        let report = lp.run_round().await;
        assert_eq!((report.updated, report.not_modified, report.failed), (1, 1, 1));

        assert_eq!(lp.status.get(ragnaros.id).unwrap().outcome, CycleOutcome::Updated);
        assert_eq!(lp.status.get(argent.id).unwrap().outcome, CycleOutcome::NotModified);
        assert!(matches!(
            lp.status.get(aerie.id).unwrap().outcome,
            CycleOutcome::Failed(ref msg) if msg.contains("503")
        ));
        assert_eq!(lp.health.rounds_completed(), 1);
        assert_eq!(lp.health.shards_tracked(), 3);
        assert_eq!(lp.latency.len(), 3);

        assert_eq!(queries::last_update(&pool, aerie.id).await.unwrap(), aerie.watermark());
        assert_ne!(queries::last_update(&pool, ragnaros.id).await.unwrap(), ragnaros.watermark());
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let server = MockServer::start().await;
        mount_oauth(&server).await;
        Mock::given(method("GET"))
            .and(path("/data/wow/connected-realm/1305/auctions"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let pool = memory_pool().await;
        let shard = queries::insert_shard(&pool, 1305, "eu", "ragnaros", "Ragnaros").await.unwrap();
        let lp = poll_loop(&server, &pool, vec![shard]).await;
        let health = Arc::clone(&lp.health);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(lp.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while health.rounds_completed() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("two rounds within 5s");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stops after cancel")
            .unwrap();
    }
}
