//! Outlier-trimmed market value of one item variant on one shard.
//!
//! Listings are treated as a price-ascending sequence of individual units
//! (a listing of quantity `q` contributes `q` units at its price). The cheap
//! end of that sequence, up to the brake point, seeds the estimate; prices
//! further than 1.5 standard deviations from that seed's mean are dropped and
//! the rest are averaged.
//!
//! Units are kept as `(price, count)` runs rather than expanded, so a
//! commodity with millions of units on sale costs one run per listing.

/// Brake point scan starts at this percentage of the unit count...
const BRAKE_START_PCT: i64 = 15;
/// ...and stops before this one.
const BRAKE_END_PCT: i64 = 30;
/// The scan stops at `i` when `price[i] * JUMP_PCT / 100 > price[i + 1]`.
const JUMP_PCT: i64 = 20;
const TRIM_STDDEVS: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketValue {
    /// Every unit on sale, including those trimmed from the value.
    pub total_quantity: i64,
    pub market_value: f64,
}

/// Estimate from `(quantity, price)` samples. Returns `None` when there is no
/// unit on sale, in which case the variant gets no sample this cycle.
pub fn estimate(samples: &[(i64, i64)]) -> Option<MarketValue> {
    let mut runs: Vec<(i64, i64)> = samples
        .iter()
        .filter(|(quantity, _)| *quantity > 0)
        .map(|&(quantity, price)| (price, quantity))
        .collect();
    if !runs.windows(2).all(|w| w[0].0 <= w[1].0) {
        runs.sort_by_key(|&(price, _)| price);
    }

    let units = UnitPrices::new(runs);
    let total_quantity = units.len();
    if total_quantity == 0 {
        return None;
    }

    let brake = brake_point(&units);
    let seed = units.prefix(brake + 1);

    Some(MarketValue {
        total_quantity,
        market_value: trimmed_mean(&seed),
    })
}

/// Run-length view of the unit price sequence.
struct UnitPrices {
    /// `(price, count)` in sequence order.
    runs: Vec<(i64, i64)>,
    /// `ends[k]` = number of units in `runs[..=k]`.
    ends: Vec<i64>,
}

impl UnitPrices {
    fn new(runs: Vec<(i64, i64)>) -> Self {
        let ends = runs
            .iter()
            .scan(0i64, |acc, &(_, count)| {
                *acc += count;
                Some(*acc)
            })
            .collect();
        Self { runs, ends }
    }

    fn len(&self) -> i64 {
        self.ends.last().copied().unwrap_or(0)
    }

    /// Price of the unit at `idx`. `idx` must be below `len()`.
    fn price_at(&self, idx: i64) -> i64 {
        let run = self.ends.partition_point(|&end| end <= idx);
        self.runs[run].0
    }

    /// The first `len` units, as runs.
    fn prefix(&self, len: i64) -> Vec<(i64, i64)> {
        let mut remaining = len;
        let mut out = Vec::new();
        for &(price, count) in &self.runs {
            if remaining == 0 {
                break;
            }
            let take = count.min(remaining);
            out.push((price, take));
            remaining -= take;
        }
        out
    }
}

/// Index of the last unit in the seed. With fewer than 4 units the scan range
/// is empty and the brake point is `N * 15%` (index 0).
fn brake_point(units: &UnitPrices) -> i64 {
    let n = units.len();
    let start = n * BRAKE_START_PCT / 100;
    let end = n * BRAKE_END_PCT / 100;

    let mut i = start;
    while i < end {
        if units.price_at(i) * JUMP_PCT / 100 > units.price_at(i + 1) {
            break;
        }
        i += 1;
    }
    i
}

/// Mean of the runs after dropping prices outside `mean ± 1.5σ` (population
/// σ). Falls back to the untrimmed mean if nothing survives.
fn trimmed_mean(runs: &[(i64, i64)]) -> f64 {
    let count: i64 = runs.iter().map(|&(_, c)| c).sum();
    let n = count as f64;
    let mean = runs.iter().map(|&(p, c)| p as f64 * c as f64).sum::<f64>() / n;
    let variance = runs
        .iter()
        .map(|&(p, c)| c as f64 * (p as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    let spread = variance.sqrt() * TRIM_STDDEVS;
    let (low, high) = (mean - spread, mean + spread);

    let (kept_sum, kept_count) = runs
        .iter()
        .filter(|&&(p, _)| (low..=high).contains(&(p as f64)))
        .fold((0.0f64, 0i64), |(sum, cnt), &(p, c)| (sum + p as f64 * c as f64, cnt + c));

    if kept_count == 0 {
        mean
    } else {
        kept_sum / kept_count as f64
    }
}
