//! Row types for the schema in migrations/0001_init.sql.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A connected realm being polled. `last_update` is the watermark in Unix
/// seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Shard {
    pub id: i64,
    pub connected_realm_id: i64,
    pub region: String,
    pub realm: String,
    pub realm_name: String,
    pub last_update: i64,
}

impl Shard {
    pub fn watermark(&self) -> DateTime<Utc> {
        from_unix_secs(self.last_update)
    }
}

/// Input to the estimator, ordered by `(item_variant_id, price)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct ListingPriceRow {
    pub item_variant_id: i64,
    pub quantity: i64,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MarketValueRow {
    pub item_variant_id: i64,
    pub original_item_id: i64,
    pub context: i64,
    pub modifiers: String,
    pub bonuses: String,
    pub pet_species_id: i64,
    pub market_value: f64,
    pub quantity: i64,
    pub sample_time: i64,
}

pub fn from_unix_secs(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
