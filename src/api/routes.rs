use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::{queries, Shard};
use crate::db::models::MarketValueRow;
use crate::error::AppError;
use crate::state::{ShardStatus, ShardStatusStore};

const DEFAULT_MARKET_VALUES_LIMIT: i64 = 100;
const MAX_MARKET_VALUES_LIMIT: i64 = 5000;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub status: Arc<ShardStatusStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/shards", get(get_shards))
        .route("/shards/:id/market_values", get(get_market_values))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MarketValuesQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub rounds_completed: u64,
    pub last_round_at: Option<i64>,
    pub shards_tracked: u64,
    pub shards_failing: usize,
    pub shards: Vec<ShardStatus>,
}

#[derive(Serialize)]
pub struct ShardResponse {
    #[serde(flatten)]
    pub shard: Shard,
    pub last_update_http: String,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        rounds_completed: state.health.rounds_completed(),
        last_round_at: state.health.last_round_at(),
        shards_tracked: state.health.shards_tracked(),
        shards_failing: state.status.failed_count(),
        shards: state.status.all(),
    })
}

async fn get_shards(State(state): State<ApiState>) -> Result<Json<Vec<ShardResponse>>, AppError> {
    let shards = queries::list_shards(&state.pool)
        .await?
        .into_iter()
        .map(|shard| ShardResponse {
            last_update_http: crate::fetcher::format_http_date(shard.watermark()),
            shard,
        })
        .collect();
    Ok(Json(shards))
}

async fn get_market_values(
    State(state): State<ApiState>,
    Path(shard_id): Path<i64>,
    Query(params): Query<MarketValuesQuery>,
) -> Result<Json<Vec<MarketValueRow>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_MARKET_VALUES_LIMIT)
        .clamp(1, MAX_MARKET_VALUES_LIMIT);

    // 404 for unknown shards rather than an empty list
    queries::get_shard(&state.pool, shard_id).await?;
    let rows = queries::latest_market_values(&state.pool, shard_id, limit).await?;
    Ok(Json(rows))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms,
        p95_ms,
        p99_ms,
    })
}
