//! feedlink-prices: Price and chart cache for the feed client
//!
//! Serves OHLC series per `(symbol, timeframe, points)` with a TTL, keeps a
//! table of current prices fed by REST snapshots and `price_update` messages,
//! and synthesizes a reproducible series when no live data is available.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod series;
pub mod source;
pub mod table;
pub mod timeframe;

pub use bridge::attach;
pub use cache::PriceCache;
pub use config::PriceCacheConfig;
pub use error::PriceError;
pub use fallback::FallbackGenerator;
pub use series::{PricePoint, PriceSeries, Provenance};
pub use source::{RestSource, SeriesSource, SocketSource, Ticker};
pub use table::PriceTable;
pub use timeframe::Timeframe;
