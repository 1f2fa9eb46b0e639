use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::RealmRef;
use crate::db::{queries, BatchWriter, Shard};
use crate::error::Result;
use crate::fetcher::{FetchOutcome, Fetcher};
use crate::pricing::{estimate, VariantKey};
use crate::types::{AuctionsResponse, Listing, MarketValueSample};

/// Runs one update cycle for a shard: conditional fetch, normalize, persist,
/// estimate, then commit the watermark.
pub struct ShardUpdater {
    pool: SqlitePool,
    fetcher: Arc<Fetcher>,
    writer: BatchWriter,
    locale: String,
}

impl ShardUpdater {
    pub fn new(pool: SqlitePool, fetcher: Arc<Fetcher>, writer: BatchWriter, locale: String) -> Self {
        Self { pool, fetcher, writer, locale }
    }

    /// Stored shard for `realm`, registering it with an epoch watermark the
    /// first time it is seen.
    pub async fn resolve_shard(&self, realm: &RealmRef) -> Result<Shard> {
        if let Some(shard) = queries::find_shard(&self.pool, &realm.region, &realm.slug).await? {
            return Ok(shard);
        }

        let (connected_realm_id, realm_name) = self
            .fetcher
            .resolve_connected_realm(&realm.region, &realm.slug, &self.locale)
            .await?;
        let shard = queries::insert_shard(
            &self.pool,
            connected_realm_id,
            &realm.region,
            &realm.slug,
            &realm_name,
        )
        .await?;
        info!(
            shard_id = shard.id,
            region = %realm.region,
            realm = %realm.slug,
            connected_realm_id,
            "Registered shard {realm_name}"
        );
        Ok(shard)
    }

    /// `Ok(false)` when upstream has nothing newer than the stored watermark.
    /// The watermark only moves after every write of the cycle succeeded.
    pub async fn try_update_shard(&self, shard: &Shard) -> Result<bool> {
        let started = Instant::now();
        let watermark = queries::last_update(&self.pool, shard.id).await?;
        let url = self
            .fetcher
            .auctions_url(&shard.region, shard.connected_realm_id, &self.locale);

        let (body, last_modified) = match self.fetcher.fetch_if_changed(&url, watermark).await? {
            FetchOutcome::NotModified => {
                debug!(shard_id = shard.id, realm = %shard.realm, "Auctions not modified");
                return Ok(false);
            }
            FetchOutcome::Fresh { body, last_modified } => (body, last_modified),
        };

        let payload: AuctionsResponse = serde_json::from_slice(&body)?;
        let listings: Vec<Listing> = payload.auctions.iter().map(Listing::from).collect();
        let variants: Vec<VariantKey> = listings
            .iter()
            .map(|l| l.variant.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.writer.upsert_variants(&variants).await?;
        self.writer.replace_listings(shard.id, &listings).await?;

        let samples = self.estimate_samples(shard.id, last_modified).await?;
        self.writer.append_market_value_samples(&samples).await?;
        self.writer.advance_watermark(shard.id, last_modified).await?;

        info!(
            shard_id = shard.id,
            realm = %shard.realm,
            listings = listings.len(),
            variants = variants.len(),
            samples = samples.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Shard updated"
        );
        Ok(true)
    }

    /// One sample per item variant among the shard's stored listings.
    async fn estimate_samples(
        &self,
        shard_id: i64,
        sample_time: DateTime<Utc>,
    ) -> Result<Vec<MarketValueSample>> {
        let rows = queries::listing_prices(&self.pool, shard_id).await?;

        let samples = rows
            .chunk_by(|a, b| a.item_variant_id == b.item_variant_id)
            .filter_map(|group| {
                let prices: Vec<(i64, i64)> = group.iter().map(|r| (r.quantity, r.price)).collect();
                let value = estimate(&prices)?;
                Some(MarketValueSample {
                    shard_id,
                    item_variant_id: group[0].item_variant_id,
                    market_value: value.market_value,
                    quantity: value.total_quantity,
                    sample_time,
                })
            })
            .collect();
        Ok(samples)
    }
}
