use dashmap::DashMap;
use feedlink::PriceUpdate;
use std::sync::Arc;
use tracing::{trace, warn};

/// Last known price per symbol, shared by everything that needs "now".
///
/// Last writer wins. Entries are never removed.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: Arc<DashMap<String, f64>>,
    default_price: f64,
}

impl PriceTable {
    pub fn new(default_price: f64) -> Self {
        Self {
            prices: Arc::new(DashMap::new()),
            default_price,
        }
    }

    pub fn with_prices<I, S>(default_price: f64, prices: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let table = Self::new(default_price);
        table.update_prices(prices);
        table
    }

    /// Current price, or the default for a symbol never seen
    pub fn get_current_price(&self, symbol: &str) -> f64 {
        self.get(symbol).unwrap_or(self.default_price)
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).map(|p| *p)
    }

    pub fn default_price(&self) -> f64 {
        self.default_price
    }

    /// Record a price. Non-finite or non-positive prices are ignored.
    pub fn update_price(&self, symbol: &str, price: f64) -> bool {
        if !(price.is_finite() && price > 0.0) {
            warn!(symbol = %symbol, price, "Ignoring invalid price");
            return false;
        }
        trace!(symbol = %symbol, price, "Price updated");
        self.prices.insert(symbol.to_string(), price);
        true
    }

    /// Returns how many prices were accepted
    pub fn update_prices<I, S>(&self, prices: I) -> usize
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut accepted = 0;
        for (symbol, price) in prices {
            let symbol: String = symbol.into();
            if self.update_price(&symbol, price) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Apply a `price_update` payload; symbols not in it are untouched
    pub fn apply_update(&self, update: &PriceUpdate) -> usize {
        update
            .0
            .iter()
            .filter(|(symbol, tick)| self.update_price(symbol, tick.price))
            .count()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.prices.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedlink::PriceTick;
    use std::collections::HashMap;

    fn tick(price: f64) -> PriceTick {
        PriceTick {
            price,
            bid: None,
            ask: None,
            spread: None,
            volume: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_unknown_symbol_returns_default() {
        let table = PriceTable::new(1.0);
        assert_eq!(table.get_current_price("NOPE"), 1.0);
        assert_eq!(table.get("NOPE"), None);
    }

    #[test]
    fn test_last_writer_wins() {
        let table = PriceTable::new(1.0);
        table.update_price("EURUSD", 1.08);
        table.update_price("EURUSD", 1.09);
        assert_eq!(table.get_current_price("EURUSD"), 1.09);
    }

    #[test]
    fn test_invalid_prices_ignored() {
        let table = PriceTable::with_prices(1.0, [("EURUSD", 1.08)]);
        assert!(!table.update_price("EURUSD", f64::NAN));
        assert!(!table.update_price("EURUSD", -1.0));
        assert_eq!(table.get_current_price("EURUSD"), 1.08);

        let accepted =
            table.update_prices(vec![("GBPUSD".to_string(), 1.27), ("X".to_string(), 0.0)]);
        assert_eq!(accepted, 1);
        assert_eq!(table.symbols(), vec!["EURUSD", "GBPUSD"]);
    }

    #[test]
    fn test_apply_update_leaves_other_symbols() {
        let table = PriceTable::with_prices(1.0, [("EURUSD", 1.08), ("GBPUSD", 1.26)]);
        let update = PriceUpdate(HashMap::from([("EURUSD".to_string(), tick(1.085))]));

        assert_eq!(table.apply_update(&update), 1);
        assert_eq!(table.get_current_price("EURUSD"), 1.085);
        assert_eq!(table.get_current_price("GBPUSD"), 1.26);
    }

    #[test]
    fn test_clones_share_state() {
        let table = PriceTable::new(1.0);
        let other = table.clone();
        other.update_price("XAUUSD", 2031.5);
        assert_eq!(table.get_current_price("XAUUSD"), 2031.5);
    }
}
