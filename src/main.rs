mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod poll_loop;
mod pricing;
mod shard_update;
mod state;
mod token;
mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, HTTP_TIMEOUT_SECS};
use crate::db::{BatchWriter, Shard};
use crate::error::{AppError, Result};
use crate::fetcher::Fetcher;
use crate::poll_loop::PollLoop;
use crate::shard_update::ShardUpdater;
use crate::state::ShardStatusStore;
use crate::token::TokenManager;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Upstream clients ---
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?;
    let tokens = Arc::new(TokenManager::new(
        http.clone(),
        &cfg.endpoints,
        &cfg.oauth_region,
        cfg.client_id.clone(),
        cfg.client_secret.clone(),
    ));
    let fetcher = Arc::new(Fetcher::new(http, tokens, cfg.endpoints.clone()));
    let writer = BatchWriter::new(pool.clone(), cfg.batch_chunk_size);
    let updater = Arc::new(ShardUpdater::new(pool.clone(), fetcher, writer, cfg.locale.clone()));

    // --- Shard registry bootstrap ---
    let shards = bootstrap_shards(&updater, &cfg).await?;
    info!(
        shards = shards.len(),
        configured = cfg.realms.len(),
        "Bootstrap complete: polling {} shards every {}s",
        shards.len(),
        cfg.poll_interval_secs,
    );

    // --- Shared state ---
    let status = ShardStatusStore::new();
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Poll loop ---
    let cancel = CancellationToken::new();
    let poll = PollLoop::new(
        updater,
        shards,
        Duration::from_secs(cfg.poll_interval_secs),
        cfg.max_concurrent_shards,
        Arc::clone(&status),
        Arc::clone(&health),
        Arc::clone(&latency),
    );
    let poll_handle = tokio::spawn(poll.run(cancel.clone()));

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current round");
            ctrl_c_cancel.cancel();
        }
    });

    // --- HTTP API server ---
    let api_state = ApiState {
        pool,
        status,
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let api_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { api_cancel.cancelled().await })
        .await?;

    if let Err(e) = poll_handle.await {
        error!("Poll loop task failed: {e}");
    }
    Ok(())
}

/// Resolve every configured realm to a stored shard. Realms that fail are
/// skipped; slugs sharing a connected realm collapse to one shard.
async fn bootstrap_shards(updater: &ShardUpdater, cfg: &Config) -> Result<Vec<Shard>> {
    let mut seen = HashSet::new();
    let mut shards = Vec::new();

    for realm in &cfg.realms {
        match updater.resolve_shard(realm).await {
            Ok(shard) => {
                if seen.insert(shard.id) {
                    shards.push(shard);
                } else {
                    info!(region = %realm.region, realm = %realm.slug, "Shares a connected realm already polled");
                }
            }
            Err(e) => warn!(region = %realm.region, realm = %realm.slug, "Could not resolve realm: {e}"),
        }
    }

    if shards.is_empty() {
        return Err(AppError::Bootstrap(format!(
            "none of the {} configured realms could be resolved",
            cfg.realms.len()
        )));
    }
    Ok(shards)
}
