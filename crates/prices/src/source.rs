//! Where live series come from
//!
//! [`RestSource`] talks to the price service over HTTP; [`SocketSource`] asks
//! over the feed connection with a one-shot `get_chart_data` request.

use async_trait::async_trait;
use feedlink::SyncClient;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::PriceError;
use crate::series::{parse_points, PricePoint};
use crate::timeframe::Timeframe;

#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        points: usize,
    ) -> Result<Vec<PricePoint>, PriceError>;
}

/// Multi-symbol ticker snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    #[serde(default)]
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub change_percent: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Client for the price service REST API
pub struct RestSource {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl RestSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PriceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, PriceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, timeout_ms = self.timeout.as_millis() as u64, "GET request");

        let response = self.http.get(&url).query(query).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(PriceError::Status { status, message });
        }
        Ok(response.json().await?)
    }

    /// Snapshot of current prices for every symbol the service knows
    pub async fn current_prices(&self) -> Result<HashMap<String, f64>, PriceError> {
        let payload = self.get_json("/api/prices/current", &[]).await?;
        let prices = parse_price_map(&payload)?;
        info!(symbols = prices.len(), "Fetched current prices");
        Ok(prices)
    }

    pub async fn tickers(&self, symbols: &[String]) -> Result<Vec<Ticker>, PriceError> {
        let payload = self
            .get_json("/api/prices/tickers", &[("symbols", symbols.join(","))])
            .await?;
        parse_tickers(&payload)
    }
}

#[async_trait]
impl SeriesSource for RestSource {
    async fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        points: usize,
    ) -> Result<Vec<PricePoint>, PriceError> {
        let payload = self
            .get_json(
                &format!("/api/chart/{}", symbol),
                &[
                    ("timeframe", timeframe.as_str().to_string()),
                    ("points", points.to_string()),
                ],
            )
            .await?;
        parse_points(&payload)
    }
}

/// Series over the feed connection
#[derive(Clone)]
pub struct SocketSource {
    client: SyncClient,
}

impl SocketSource {
    pub fn new(client: SyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SeriesSource for SocketSource {
    async fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        points: usize,
    ) -> Result<Vec<PricePoint>, PriceError> {
        let payload = self
            .client
            .request_chart_data(symbol, timeframe.as_str(), points)
            .await?;
        parse_points(&payload)
    }
}

/// `{"EURUSD": 1.085}` or `{"EURUSD": {"price": 1.085, ...}}`, optionally under `prices`
pub fn parse_price_map(payload: &Value) -> Result<HashMap<String, f64>, PriceError> {
    let obj = payload
        .get("prices")
        .unwrap_or(payload)
        .as_object()
        .ok_or_else(|| PriceError::Malformed("price snapshot is not an object".to_string()))?;

    let mut prices = HashMap::with_capacity(obj.len());
    for (symbol, entry) in obj {
        let price = match entry {
            Value::Number(n) => n.as_f64(),
            Value::Object(_) => entry.get("price").and_then(Value::as_f64),
            _ => None,
        };
        match price {
            Some(price) => {
                prices.insert(symbol.clone(), price);
            }
            None => debug!(symbol = %symbol, "Skipping snapshot entry without a price"),
        }
    }
    Ok(prices)
}

/// Either a list of tickers or a `symbol -> ticker` map, optionally under `tickers`
pub fn parse_tickers(payload: &Value) -> Result<Vec<Ticker>, PriceError> {
    let inner = payload.get("tickers").unwrap_or(payload);
    let mut tickers = match inner {
        Value::Array(_) => Vec::<Ticker>::deserialize(inner)?,
        Value::Object(obj) => {
            let mut tickers = Vec::with_capacity(obj.len());
            for (symbol, entry) in obj {
                let mut ticker = Ticker::deserialize(entry)?;
                if ticker.symbol.is_empty() {
                    ticker.symbol = symbol.clone();
                }
                tickers.push(ticker);
            }
            tickers
        }
        _ => {
            return Err(PriceError::Malformed(
                "ticker payload is not an array or object".to_string(),
            ))
        }
    };
    tickers.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Ok(tickers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, RestSource) {
        let server = MockServer::start().await;
        let source = RestSource::new(&server.uri(), Duration::from_secs(10)).unwrap();
        (server, source)
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let source = RestSource::new("http://localhost:8000/", Duration::from_secs(10)).unwrap();
        assert_eq!(source.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_parse_price_map_shapes() {
        let flat = parse_price_map(&json!({"EURUSD": 1.085, "GBPUSD": 1.265})).unwrap();
        assert_eq!(flat["EURUSD"], 1.085);

        let nested =
            parse_price_map(&json!({"prices": {"EURUSD": {"price": 1.09, "bid": 1.0899}, "BAD": "x"}}))
                .unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested["EURUSD"], 1.09);

        assert!(parse_price_map(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_parse_tickers_map_fills_symbol() {
        let tickers = parse_tickers(&json!({
            "GBPUSD": {"price": 1.265, "change_percent": -0.2},
            "EURUSD": {"price": 1.085}
        }))
        .unwrap();
        assert_eq!(tickers[0].symbol, "EURUSD");
        assert_eq!(tickers[1].change_percent, Some(-0.2));
    }

    #[tokio::test]
    async fn test_fetch_series_success() {
        let (server, source) = setup().await;

        Mock::given(method("GET"))
            .and(path("/api/chart/EURUSD"))
            .and(query_param("timeframe", "1h"))
            .and(query_param("points", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "EURUSD",
                "data": [
                    {"timestamp": "2024-01-01T00:00:00Z", "open": 1.08, "high": 1.09, "low": 1.07, "close": 1.085},
                    {"timestamp": "2024-01-01T01:00:00Z", "open": 1.085, "high": 1.09, "low": 1.08, "close": 1.088}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let points = source.fetch_series("EURUSD", Timeframe::H1, 2).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].close, 1.088);
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let (server, source) = setup().await;

        Mock::given(method("GET"))
            .and(path("/api/prices/current"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        match source.current_prices().await {
            Err(PriceError::Status { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("expected Status error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tickers_query() {
        let (server, source) = setup().await;

        Mock::given(method("GET"))
            .and(path("/api/prices/tickers"))
            .and(query_param("symbols", "EURUSD,USDJPY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "USDJPY", "price": 149.5},
                {"symbol": "EURUSD", "price": 1.085, "bid": 1.0849, "ask": 1.0851}
            ])))
            .mount(&server)
            .await;

        let tickers = source
            .tickers(&["EURUSD".to_string(), "USDJPY".to_string()])
            .await
            .unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[0].symbol, "EURUSD");
        assert_eq!(tickers[0].ask, Some(1.0851));
    }
}
