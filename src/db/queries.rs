use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{from_unix_secs, ListingPriceRow, MarketValueRow, Shard};
use crate::error::{AppError, Result};
use crate::pricing::VariantKey;

const SHARD_COLUMNS: &str = "id, connected_realm_id, region, realm, realm_name, last_update";

/// Shard a realm slug resolved to, whether it was the slug that registered
/// the shard or another slug on the same connected realm.
pub async fn find_shard(pool: &SqlitePool, region: &str, realm: &str) -> Result<Option<Shard>> {
    let shard = sqlx::query_as::<_, Shard>(
        r#"
        SELECT s.id, s.connected_realm_id, s.region, s.realm, s.realm_name, s.last_update
        FROM realm_aliases a
        JOIN shards s ON s.id = a.shard_id
        WHERE a.region = ? AND a.realm = ?
        "#,
    )
    .bind(region)
    .bind(realm)
    .fetch_optional(pool)
    .await?;
    Ok(shard)
}

pub async fn get_shard(pool: &SqlitePool, shard_id: i64) -> Result<Shard> {
    sqlx::query_as::<_, Shard>(&format!("SELECT {SHARD_COLUMNS} FROM shards WHERE id = ?"))
        .bind(shard_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::ShardNotFound(shard_id))
}

pub async fn list_shards(pool: &SqlitePool) -> Result<Vec<Shard>> {
    let shards = sqlx::query_as::<_, Shard>(&format!(
        "SELECT {SHARD_COLUMNS} FROM shards ORDER BY region, connected_realm_id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(shards)
}

/// Register a connected realm with an epoch watermark. A realm already
/// registered under another slug keeps its existing row, and `realm` is
/// recorded as an alias of it.
pub async fn insert_shard(
    pool: &SqlitePool,
    connected_realm_id: i64,
    region: &str,
    realm: &str,
    realm_name: &str,
) -> Result<Shard> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO shards (connected_realm_id, region, realm, realm_name, last_update)
        VALUES (?, ?, ?, ?, 0)
        "#,
    )
    .bind(connected_realm_id)
    .bind(region)
    .bind(realm)
    .bind(realm_name)
    .execute(pool)
    .await?;

    let shard = sqlx::query_as::<_, Shard>(&format!(
        "SELECT {SHARD_COLUMNS} FROM shards WHERE region = ? AND connected_realm_id = ?"
    ))
    .bind(region)
    .bind(connected_realm_id)
    .fetch_one(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO realm_aliases (region, realm, shard_id) VALUES (?, ?, ?)")
        .bind(region)
        .bind(realm)
        .bind(shard.id)
        .execute(pool)
        .await?;
    Ok(shard)
}

pub async fn last_update(pool: &SqlitePool, shard_id: i64) -> Result<DateTime<Utc>> {
    let secs: Option<i64> = sqlx::query_scalar("SELECT last_update FROM shards WHERE id = ?")
        .bind(shard_id)
        .fetch_optional(pool)
        .await?;
    secs.map(from_unix_secs).ok_or(AppError::ShardNotFound(shard_id))
}

/// The shard's current listings grouped by variant, cheapest first within
/// each group.
pub async fn listing_prices(pool: &SqlitePool, shard_id: i64) -> Result<Vec<ListingPriceRow>> {
    let rows = sqlx::query_as::<_, ListingPriceRow>(
        r#"
        SELECT item_variant_id, quantity, price
        FROM listings
        WHERE shard_id = ?
        ORDER BY item_variant_id ASC, price ASC
        "#,
    )
    .bind(shard_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn variant_id(pool: &SqlitePool, key: &VariantKey) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        r#"
        SELECT id FROM item_variants
        WHERE original_item_id = ? AND context = ? AND modifiers = ? AND bonuses = ?
          AND pet_breed_id = ? AND pet_level = ? AND pet_quality_id = ? AND pet_species_id = ?
        "#,
    )
    .bind(key.item_id)
    .bind(key.context)
    .bind(key.modifiers_column())
    .bind(key.bonuses_column())
    .bind(key.pet_breed_id)
    .bind(key.pet_level)
    .bind(key.pet_quality_id)
    .bind(key.pet_species_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

/// Samples from the shard's most recent sample time, most valuable first.
pub async fn latest_market_values(
    pool: &SqlitePool,
    shard_id: i64,
    limit: i64,
) -> Result<Vec<MarketValueRow>> {
    let rows = sqlx::query_as::<_, MarketValueRow>(
        r#"
        SELECT s.item_variant_id, v.original_item_id, v.context, v.modifiers, v.bonuses,
               v.pet_species_id, s.market_value, s.quantity, s.sample_time
        FROM market_value_samples s
        JOIN item_variants v ON v.id = s.item_variant_id
        WHERE s.shard_id = ?
          AND s.sample_time = (SELECT MAX(sample_time) FROM market_value_samples WHERE shard_id = ?)
        ORDER BY s.market_value DESC
        LIMIT ?
        "#,
    )
    .bind(shard_id)
    .bind(shard_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
