//! Deterministic fallback series
//!
//! Used when neither the feed nor the REST service can supply bars. Output is
//! reproducible: the random walk is seeded from `(symbol, timeframe, points,
//! seed price)`, so identical inputs always yield identical values. Timestamps
//! are anchored to the caller-supplied `end`, floored to the bar interval.
//!
//! The walk runs backwards from the seed price, so the newest bar closes at
//! exactly the current price and the chart joins up with live ticks.

use chrono::{DateTime, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::series::{PricePoint, PriceSeries, Provenance};
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackGenerator {
    /// Max relative move per bar, e.g. 0.001 for 0.1%
    volatility: f64,
}

impl FallbackGenerator {
    pub fn new(volatility: f64) -> Self {
        Self {
            volatility: volatility.abs(),
        }
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn generate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        points: usize,
        seed_price: f64,
        end: DateTime<Utc>,
    ) -> PriceSeries {
        let mut rng = ChaCha8Rng::seed_from_u64(seed(symbol, timeframe, points, seed_price));
        let vol = self.volatility;

        // closes, newest first
        let mut closes = Vec::with_capacity(points);
        let mut price = seed_price;
        for _ in 0..points {
            closes.push(price);
            let step = if vol > 0.0 {
                rng.random_range(-vol..=vol)
            } else {
                0.0
            };
            price = (price * (1.0 - step)).max(f64::MIN_POSITIVE);
        }
        closes.reverse();

        let interval = timeframe.interval_secs();
        let anchor = end.timestamp() - end.timestamp().rem_euclid(interval);

        let mut bars = Vec::with_capacity(points);
        for (i, &close) in closes.iter().enumerate() {
            let open = if i == 0 { close } else { closes[i - 1] };
            let (wick_up, wick_down) = if vol > 0.0 {
                (rng.random_range(0.0..=vol / 2.0), rng.random_range(0.0..=vol / 2.0))
            } else {
                (0.0, 0.0)
            };
            let offset = (points - 1 - i) as i64 * interval;
            let Some(timestamp) = Utc.timestamp_opt(anchor - offset, 0).single() else {
                continue;
            };
            bars.push(PricePoint {
                timestamp,
                open,
                high: open.max(close) * (1.0 + wick_up),
                low: open.min(close) * (1.0 - wick_down),
                close,
                volume: rng.random_range(100.0..1_000.0_f64).round(),
            });
        }

        PriceSeries::new(symbol, timeframe, bars, Provenance::Fallback)
    }
}

impl Default for FallbackGenerator {
    fn default() -> Self {
        Self::new(0.001)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable FNV-1a digest of the inputs
fn seed(symbol: &str, timeframe: Timeframe, points: usize, seed_price: f64) -> u64 {
    let points = (points as u64).to_le_bytes();
    let price = seed_price.to_bits().to_le_bytes();
    let fields: [&[u8]; 4] = [
        symbol.as_bytes(),
        timeframe.as_str().as_bytes(),
        &points,
        &price,
    ];
    let mut hash = FNV_OFFSET;
    for field in fields {
        for &byte in field {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        // field separator
        hash ^= 0xff;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
