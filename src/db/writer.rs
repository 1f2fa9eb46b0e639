use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{AppError, Result};
use crate::pricing::VariantKey;
use crate::types::{Listing, MarketValueSample};

/// Chunked writes of item variants, listings and market value samples.
///
/// Every batch operation splits its input into chunks of `chunk_size` rows
/// and binds each chunk into one multi-row INSERT, so a chunk is one
/// round-trip and one implicit transaction. A failing chunk aborts the call;
/// chunks already written stay written. Each call returns the number of
/// INSERT statements it issued; the DELETE that `replace_listings` runs
/// first is not counted.
#[derive(Clone)]
pub struct BatchWriter {
    pool: SqlitePool,
    chunk_size: usize,
}

impl BatchWriter {
    pub fn new(pool: SqlitePool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Insert variants not yet stored. An existing identity is left as is.
    pub async fn upsert_variants(&self, variants: &[VariantKey]) -> Result<usize> {
        let mut round_trips = 0;
        for chunk in variants.chunks(self.chunk_size) {
            let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO item_variants (original_item_id, context, modifiers, bonuses, \
                 pet_breed_id, pet_level, pet_quality_id, pet_species_id) ",
            );
            qb.push_values(chunk, |mut b, v| {
                b.push_bind(v.item_id)
                    .push_bind(v.context)
                    .push_bind(v.modifiers_column())
                    .push_bind(v.bonuses_column())
                    .push_bind(v.pet_breed_id)
                    .push_bind(v.pet_level)
                    .push_bind(v.pet_quality_id)
                    .push_bind(v.pet_species_id);
            });
            qb.build().execute(&self.pool).await?;
            round_trips += 1;
        }
        Ok(round_trips)
    }

    /// Supersede the shard's listings with `listings`. Each row's variant id
    /// is looked up by identity, so the variants must already be stored; a
    /// missing one fails the chunk on the NOT NULL constraint.
    pub async fn replace_listings(&self, shard_id: i64, listings: &[Listing]) -> Result<usize> {
        sqlx::query("DELETE FROM listings WHERE shard_id = ?")
            .bind(shard_id)
            .execute(&self.pool)
            .await?;

        let mut round_trips = 0;
        for chunk in listings.chunks(self.chunk_size) {
            let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "INSERT INTO listings (shard_id, auction_id, item_variant_id, bid, price, quantity, time_left) ",
            );
            qb.push_values(chunk, |mut b, listing| {
                let v = &listing.variant;
                b.push_bind(shard_id)
                    .push_bind(listing.auction_id)
                    .push("(SELECT id FROM item_variants WHERE original_item_id = ")
                    .push_bind_unseparated(v.item_id)
                    .push_unseparated(" AND context = ")
                    .push_bind_unseparated(v.context)
                    .push_unseparated(" AND modifiers = ")
                    .push_bind_unseparated(v.modifiers_column())
                    .push_unseparated(" AND bonuses = ")
                    .push_bind_unseparated(v.bonuses_column())
                    .push_unseparated(" AND pet_breed_id = ")
                    .push_bind_unseparated(v.pet_breed_id)
                    .push_unseparated(" AND pet_level = ")
                    .push_bind_unseparated(v.pet_level)
                    .push_unseparated(" AND pet_quality_id = ")
                    .push_bind_unseparated(v.pet_quality_id)
                    .push_unseparated(" AND pet_species_id = ")
                    .push_bind_unseparated(v.pet_species_id)
                    .push_unseparated(")")
                    .push_bind(listing.bid)
                    .push_bind(listing.price)
                    .push_bind(listing.quantity)
                    .push_bind(listing.time_left.to_string());
            });
            qb.build().execute(&self.pool).await?;
            round_trips += 1;
        }
        Ok(round_trips)
    }

    pub async fn append_market_value_samples(&self, samples: &[MarketValueSample]) -> Result<usize> {
        let mut round_trips = 0;
        for chunk in samples.chunks(self.chunk_size) {
            let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "INSERT INTO market_value_samples (shard_id, item_variant_id, market_value, quantity, sample_time) ",
            );
            qb.push_values(chunk, |mut b, s| {
                b.push_bind(s.shard_id)
                    .push_bind(s.item_variant_id)
                    .push_bind(s.market_value)
                    .push_bind(s.quantity)
                    .push_bind(s.sample_time.timestamp());
            });
            qb.build().execute(&self.pool).await?;
            round_trips += 1;
        }
        Ok(round_trips)
    }

    /// Move the shard's watermark forward. An older `watermark` leaves the
    /// stored one in place.
    pub async fn advance_watermark(&self, shard_id: i64, watermark: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE shards SET last_update = MAX(last_update, ?) WHERE id = ?")
            .bind(watermark.timestamp())
            .bind(shard_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::ShardNotFound(shard_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::BATCH_CHUNK_SIZE;
    use crate::db::{memory_pool, queries};
    use crate::pricing::estimate;
    use crate::types::TimeLeft;

    fn key(item_id: i64) -> VariantKey {
        VariantKey {
            item_id,
            context: -1,
            modifiers: Vec::new(),
            bonuses: Vec::new(),
            pet_breed_id: -1,
            pet_level: -1,
            pet_quality_id: -1,
            pet_species_id: -1,
        }
    }

    fn listing(auction_id: i64, variant: VariantKey, price: i64, quantity: i64) -> Listing {
        Listing {
            auction_id,
            variant,
            bid: 0,
            price,
            quantity,
            time_left: TimeLeft::Long,
        }
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn repeated_upserts_store_one_row_per_identity() {
        let pool = memory_pool().await;
        let writer = BatchWriter::new(pool.clone(), 5000);
        let gear = VariantKey {
            context: 3,
            bonuses: vec![6654, 1679],
            modifiers: vec![9, 60],
            ..key(19019)
        };

        writer.upsert_variants(&[gear.clone(), key(2589)]).await.unwrap();
        let first_id = queries::variant_id(&pool, &gear).await.unwrap();
        writer.upsert_variants(&[gear.clone(), gear.clone(), key(2589)]).await.unwrap();

        assert_eq!(count(&pool, "item_variants").await, 2);
        assert_eq!(queries::variant_id(&pool, &gear).await.unwrap(), first_id);
    }

    #[tokio::test]
    async fn reordered_bonuses_are_a_new_variant() {
        let pool = memory_pool().await;
        let writer = BatchWriter::new(pool.clone(), 5000);
        let a = VariantKey { bonuses: vec![1, 2], ..key(7) };
        let b = VariantKey { bonuses: vec![2, 1], ..key(7) };
        writer.upsert_variants(&[a, b]).await.unwrap();
        assert_eq!(count(&pool, "item_variants").await, 2);
    }

    #[tokio::test]
    async fn chunk_boundaries_set_round_trips() {
        let pool = memory_pool().await;
        let writer = BatchWriter::new(pool.clone(), 5000);

        let variants: Vec<VariantKey> = (0..10_000).map(key).collect();
        assert_eq!(writer.upsert_variants(&variants).await.unwrap(), 2);

        let variants: Vec<VariantKey> = (0..10_001).map(key).collect();
        assert_eq!(writer.upsert_variants(&variants).await.unwrap(), 3);

        assert_eq!(writer.upsert_variants(&[]).await.unwrap(), 0);
        assert_eq!(count(&pool, "item_variants").await, 10_001);
    }

    #[tokio::test]
    async fn full_default_chunk_of_listings_is_one_statement() {
        let pool = memory_pool().await;
        let shard = queries::insert_shard(&pool, 1305, "eu", "ragnaros", "Ragnaros").await.unwrap();
        let writer = BatchWriter::new(pool.clone(), BATCH_CHUNK_SIZE);

        let variants: Vec<VariantKey> = (0..BATCH_CHUNK_SIZE as i64).map(key).collect();
        assert_eq!(writer.upsert_variants(&variants).await.unwrap(), 1);

        let listings: Vec<Listing> = (0..BATCH_CHUNK_SIZE as i64)
            .map(|i| listing(i, key(i), 100 + i, 1))
            .collect();
        assert_eq!(writer.replace_listings(shard.id, &listings).await.unwrap(), 1);
        assert_eq!(count(&pool, "listings").await, BATCH_CHUNK_SIZE as i64);

        let more: Vec<Listing> = (0..2 * BATCH_CHUNK_SIZE as i64 + 1)
            .map(|i| listing(i, key(i % BATCH_CHUNK_SIZE as i64), 100, 1))
            .collect();
        assert_eq!(writer.replace_listings(shard.id, &more).await.unwrap(), 3);
        assert_eq!(count(&pool, "listings").await, 2 * BATCH_CHUNK_SIZE as i64 + 1);
    }

    #[tokio::test]
    async fn replace_listings_supersedes_previous_cycle() {
        let pool = memory_pool().await;
        let shard = queries::insert_shard(&pool, 1305, "eu", "ragnaros", "Ragnaros").await.unwrap();
        let writer = BatchWriter::new(pool.clone(), 2);
        writer.upsert_variants(&[key(1), key(2)]).await.unwrap();

        let first: Vec<Listing> = (0..5).map(|i| listing(i, key(1), 100, 1)).collect();
        assert_eq!(writer.replace_listings(shard.id, &first).await.unwrap(), 3);
        assert_eq!(count(&pool, "listings").await, 5);

        let second = vec![listing(10, key(2), 50, 4)];
        assert_eq!(writer.replace_listings(shard.id, &second).await.unwrap(), 1);
        assert_eq!(count(&pool, "listings").await, 1);

        let rows = queries::listing_prices(&pool, shard.id).await.unwrap();
        let variant = queries::variant_id(&pool, &key(2)).await.unwrap().unwrap();
        assert_eq!(rows[0].item_variant_id, variant);
        assert_eq!((rows[0].quantity, rows[0].price), (4, 50));
    }

    #[tokio::test]
    async fn listing_for_unknown_variant_is_persistence_failure() {
        let pool = memory_pool().await;
        let shard = queries::insert_shard(&pool, 1305, "eu", "ragnaros", "Ragnaros").await.unwrap();
        let writer = BatchWriter::new(pool.clone(), 5000);

        let err = writer
            .replace_listings(shard.id, &[listing(1, key(404), 10, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() {
        let pool = memory_pool().await;
        let shard = queries::insert_shard(&pool, 1305, "eu", "ragnaros", "Ragnaros").await.unwrap();
        let writer = BatchWriter::new(pool.clone(), 5000);
        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();

        writer.advance_watermark(shard.id, t2).await.unwrap();
        writer.advance_watermark(shard.id, t1).await.unwrap();
        assert_eq!(queries::last_update(&pool, shard.id).await.unwrap(), t2);

        assert!(matches!(
            writer.advance_watermark(999, t2).await,
            Err(AppError::ShardNotFound(999))
        ));
    }

    #[tokio::test]
    async fn samples_are_appended_not_replaced() {
        let pool = memory_pool().await;
        let shard = queries::insert_shard(&pool, 1305, "eu", "ragnaros", "Ragnaros").await.unwrap();
        let writer = BatchWriter::new(pool.clone(), 5000);
        writer.upsert_variants(&[key(1)]).await.unwrap();
        let variant = queries::variant_id(&pool, &key(1)).await.unwrap().unwrap();

        for hour in [12, 13] {
            let sample = MarketValueSample {
                shard_id: shard.id,
                item_variant_id: variant,
                market_value: 10.0 * hour as f64,
                quantity: 3,
                sample_time: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
            };
            writer.append_market_value_samples(&[sample]).await.unwrap();
        }
        assert_eq!(count(&pool, "market_value_samples").await, 2);

        let latest = queries::latest_market_values(&pool, shard.id, 10).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].market_value, 130.0);
    }

    #[tokio::test]
    async fn stored_listings_reproduce_in_memory_estimate() {
        let pool = memory_pool().await;
        let shard = queries::insert_shard(&pool, 1305, "eu", "ragnaros", "Ragnaros").await.unwrap();
        let writer = BatchWriter::new(pool.clone(), 3);

        let prices = [(4, 120), (1, 95), (9, 101), (2, 4000), (6, 99), (1, 100), (3, 97)];
        let listings: Vec<Listing> = prices
            .iter()
            .enumerate()
            .map(|(i, &(q, p))| listing(i as i64, key(2589), p, q))
            .collect();
        writer.upsert_variants(&[key(2589)]).await.unwrap();
        writer.replace_listings(shard.id, &listings).await.unwrap();

        let stored: Vec<(i64, i64)> = queries::listing_prices(&pool, shard.id)
            .await
            .unwrap()
            .iter()
            .map(|r| (r.quantity, r.price))
            .collect();
        assert_eq!(estimate(&stored), estimate(&prices));
    }
}
