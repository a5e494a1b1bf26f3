//! Per-symbol series cache with TTL and deterministic fallback
//!
//! Entries are keyed by `(symbol, timeframe, points)` and replaced wholesale on
//! refetch. A hit within the TTL returns the very same `Arc`. When the source
//! fails, a fallback series is synthesized from the current price table and
//! returned without being cached, so the next call retries the source.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PriceCacheConfig;
use crate::error::PriceError;
use crate::fallback::FallbackGenerator;
use crate::series::{PriceSeries, Provenance};
use crate::source::{RestSource, SeriesSource, Ticker};
use crate::table::PriceTable;
use crate::timeframe::Timeframe;

type CacheKey = (String, Timeframe, usize);

struct CacheEntry {
    series: Arc<PriceSeries>,
    fetched_at: Instant,
}

pub struct PriceCache {
    entries: DashMap<CacheKey, CacheEntry>,
    table: PriceTable,
    source: Arc<dyn SeriesSource>,
    rest: Arc<RestSource>,
    fallback: FallbackGenerator,
    ttl: Duration,
}

impl PriceCache {
    /// Cache backed by the REST price service for both series and snapshots
    pub fn new(config: &PriceCacheConfig) -> Result<Self, PriceError> {
        config.validate()?;
        let rest = Arc::new(RestSource::new(&config.base_url, config.request_timeout())?);
        let table = PriceTable::with_prices(config.default_price, config.seed_prices.clone());
        Ok(Self {
            entries: DashMap::new(),
            table,
            source: rest.clone(),
            rest,
            fallback: FallbackGenerator::new(config.fallback_volatility),
            ttl: config.ttl(),
        })
    }

    /// Fetch series from `source` instead of REST, e.g. a [`crate::SocketSource`]
    pub fn with_series_source(mut self, source: Arc<dyn SeriesSource>) -> Self {
        self.source = source;
        self
    }

    /// Share an existing table, e.g. one already fed by the price stream
    pub fn with_table(mut self, table: PriceTable) -> Self {
        self.table = table;
        self
    }

    pub fn table(&self) -> &PriceTable {
        &self.table
    }

    /// Cached series if fresh, else a live fetch, else a fallback series
    pub async fn get_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        points: usize,
    ) -> Arc<PriceSeries> {
        let key = (symbol.to_string(), timeframe, points);
        if let Some(entry) = self.entries.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                debug!(symbol = %symbol, timeframe = %timeframe, points, "Series cache hit");
                return Arc::clone(&entry.series);
            }
        }

        match self.fetch(symbol, timeframe, points).await {
            Ok(series) => {
                let series = Arc::new(series);
                if let Some(close) = series.last_close() {
                    self.table.update_price(symbol, close);
                }
                self.entries.insert(
                    key,
                    CacheEntry {
                        series: Arc::clone(&series),
                        fetched_at: Instant::now(),
                    },
                );
                series
            }
            Err(e) => {
                warn!(
                    symbol = %symbol,
                    timeframe = %timeframe,
                    error = %e,
                    "Series fetch failed, using fallback"
                );
                Arc::new(self.fallback_series(symbol, timeframe, points))
            }
        }
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        points: usize,
    ) -> Result<PriceSeries, PriceError> {
        let bars = self.source.fetch_series(symbol, timeframe, points).await?;
        if bars.is_empty() {
            return Err(PriceError::Malformed(format!("empty series for {}", symbol)));
        }
        Ok(PriceSeries::new(symbol, timeframe, bars, Provenance::Live))
    }

    /// Synthetic series seeded from the current price; never touches the cache
    pub fn fallback_series(&self, symbol: &str, timeframe: Timeframe, points: usize) -> PriceSeries {
        let seed = self.table.get_current_price(symbol);
        self.fallback
            .generate(symbol, timeframe, points, seed, Utc::now())
    }

    pub fn get_current_price(&self, symbol: &str) -> f64 {
        self.table.get_current_price(symbol)
    }

    pub fn update_price(&self, symbol: &str, price: f64) -> bool {
        self.table.update_price(symbol, price)
    }

    pub fn update_prices<I, S>(&self, prices: I) -> usize
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.table.update_prices(prices)
    }

    /// Pull the REST price snapshot into the table
    pub async fn refresh_current_prices(&self) -> Result<usize, PriceError> {
        let prices = self.rest.current_prices().await?;
        let updated = self.table.update_prices(prices);
        info!(updated, "Current prices refreshed");
        Ok(updated)
    }

    /// Ticker snapshot for `symbols`; their prices also land in the table
    pub async fn get_tickers(&self, symbols: &[String]) -> Result<Vec<Ticker>, PriceError> {
        let tickers = self.rest.tickers(symbols).await?;
        for ticker in &tickers {
            self.table.update_price(&ticker.symbol, ticker.price);
        }
        Ok(tickers)
    }

    /// Drop every cached series for `symbol`
    pub fn invalidate(&self, symbol: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(s, _, _), _| s != symbol);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::PricePoint;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Returns a fixed two-bar series, or fails while `failing` is set
    #[derive(Default)]
    struct StubSource {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl SeriesSource for StubSource {
        async fn fetch_series(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _points: usize,
        ) -> Result<Vec<PricePoint>, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(PriceError::Malformed("stub failure".to_string()));
            }
            let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let bar = |i: i64, close: f64| PricePoint {
                timestamp: t0 + chrono::TimeDelta::hours(i),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            };
            Ok(vec![bar(0, 1.08), bar(1, 1.0875)])
        }
    }

    fn cache(source: Arc<StubSource>) -> PriceCache {
        PriceCache::new(&PriceCacheConfig::default())
            .unwrap()
            .with_series_source(source)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_returns_same_arc() {
        let source = Arc::new(StubSource::default());
        let cache = cache(source.clone());

        let a = cache.get_series("EURUSD", Timeframe::H1, 2).await;
        let b = cache.get_series("EURUSD", Timeframe::H1, 2).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.provenance, Provenance::Live);

        tokio::time::advance(Duration::from_secs(60)).await;
        let c = cache.get_series("EURUSD", Timeframe::H1, 2).await;
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_key_includes_timeframe_and_points() {
        let source = Arc::new(StubSource::default());
        let cache = cache(source.clone());

        cache.get_series("EURUSD", Timeframe::H1, 2).await;
        cache.get_series("EURUSD", Timeframe::H4, 2).await;
        cache.get_series("EURUSD", Timeframe::H1, 3).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.cached_len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_updates_current_price() {
        let source = Arc::new(StubSource::default());
        let cache = cache(source);

        cache.get_series("EURUSD", Timeframe::H1, 2).await;
        assert_eq!(cache.get_current_price("EURUSD"), 1.0875);
    }

    #[tokio::test]
    async fn test_failure_falls_back_without_caching() {
        let source = Arc::new(StubSource::default());
        source.failing.store(true, Ordering::SeqCst);
        let cache = cache(source.clone());

        let series = cache.get_series("GBPUSD", Timeframe::M15, 30).await;
        assert_eq!(series.provenance, Provenance::Fallback);
        assert_eq!(series.len(), 30);
        assert_eq!(series.last_close(), Some(1.265));
        assert_eq!(cache.cached_len(), 0);
        assert_eq!(cache.get_current_price("GBPUSD"), 1.265);

        // the next call goes back to the source
        source.failing.store(false, Ordering::SeqCst);
        let series = cache.get_series("GBPUSD", Timeframe::M15, 30).await;
        assert!(series.is_live());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fallback_for_unknown_symbol_uses_default_price() {
        let source = Arc::new(StubSource::default());
        source.failing.store(true, Ordering::SeqCst);
        let cache = cache(source);

        let series = cache.get_series("NZDCHF", Timeframe::D1, 5).await;
        assert_eq!(series.last_close(), Some(1.0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PriceCacheConfig::default();
        config.fallback_volatility = 1.5;
        assert!(matches!(
            PriceCache::new(&config),
            Err(PriceError::Config(_))
        ));

        let config = PriceCacheConfig::default().default_price(-1.0);
        assert!(PriceCache::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let source = Arc::new(StubSource::default());
        let cache = cache(source.clone());

        cache.get_series("EURUSD", Timeframe::H1, 2).await;
        cache.get_series("EURUSD", Timeframe::H4, 2).await;
        cache.get_series("USDJPY", Timeframe::H1, 2).await;

        assert_eq!(cache.invalidate("EURUSD"), 2);
        assert_eq!(cache.cached_len(), 1);

        cache.clear();
        assert_eq!(cache.cached_len(), 0);
        cache.get_series("USDJPY", Timeframe::H1, 2).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }
}
