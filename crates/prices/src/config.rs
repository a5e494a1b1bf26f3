//! Price cache configuration

use feedlink::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceCacheConfig {
    /// How long a fetched series is served from cache
    pub ttl_secs: u64,
    /// Returned for symbols with no known price
    pub default_price: f64,
    /// Initial current prices, also the seed for fallback series
    pub seed_prices: HashMap<String, f64>,
    /// Max relative move per fallback bar
    pub fallback_volatility: f64,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        let seed_prices = [
            ("EURUSD", 1.085),
            ("GBPUSD", 1.265),
            ("USDJPY", 149.5),
            ("AUDUSD", 0.655),
            ("USDCHF", 0.885),
            ("USDCAD", 1.355),
            ("XAUUSD", 2030.0),
        ]
        .into_iter()
        .map(|(s, p)| (s.to_string(), p))
        .collect();

        Self {
            ttl_secs: 60,
            default_price: 1.0,
            seed_prices,
            fallback_volatility: 0.001,
            base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl PriceCacheConfig {
    /// Defaults overridden by `FEEDLINK_PRICES_URL`, `FEEDLINK_PRICE_TTL_SECS`
    /// and `FEEDLINK_DEFAULT_PRICE` when set
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = env::var("FEEDLINK_PRICES_URL") {
            config.base_url = url;
        }
        if let Ok(raw) = env::var("FEEDLINK_PRICE_TTL_SECS") {
            config.ttl_secs = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("FEEDLINK_PRICE_TTL_SECS: invalid value {:?}", raw))
            })?;
        }
        if let Ok(raw) = env::var("FEEDLINK_DEFAULT_PRICE") {
            config.default_price = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("FEEDLINK_DEFAULT_PRICE: invalid value {:?}", raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.default_price.is_finite() && self.default_price > 0.0) {
            return Err(ConfigError::Invalid(
                "default price must be a positive number".to_string(),
            ));
        }
        if !(0.0..0.5).contains(&self.fallback_volatility) {
            return Err(ConfigError::Invalid(
                "fallback volatility must be in [0, 0.5)".to_string(),
            ));
        }
        if let Some((symbol, _)) = self
            .seed_prices
            .iter()
            .find(|(_, p)| !(p.is_finite() && **p > 0.0))
        {
            return Err(ConfigError::Invalid(format!(
                "seed price for {} must be a positive number",
                symbol
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn ttl_secs(mut self, secs: u64) -> Self {
        self.ttl_secs = secs;
        self
    }

    pub fn default_price(mut self, price: f64) -> Self {
        self.default_price = price;
        self
    }

    pub fn seed_price(mut self, symbol: impl Into<String>, price: f64) -> Self {
        self.seed_prices.insert(symbol.into(), price);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PriceCacheConfig::default();
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert_eq!(config.default_price, 1.0);
        assert_eq!(config.seed_prices["EURUSD"], 1.085);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "ttl_secs: 15\nbase_url: http://prices.internal:9000\nseed_prices:\n  BTCUSD: 64000.0"
        )
        .unwrap();

        let config = PriceCacheConfig::load(file.path()).unwrap();
        assert_eq!(config.ttl_secs, 15);
        assert_eq!(config.base_url, "http://prices.internal:9000");
        assert_eq!(config.seed_prices.len(), 1);
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn test_validate_rejects_bad_prices() {
        let config = PriceCacheConfig::default().default_price(0.0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = PriceCacheConfig::default().seed_price("EURUSD", f64::NAN);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
