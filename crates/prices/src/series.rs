//! Price series types and payload parsing
//!
//! Chart payloads from the REST service and from the socket are not under our
//! control, so parsing is lenient about field names and timestamp encodings.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PriceError;
use crate::timeframe::Timeframe;

/// Whether a series came from the market data path or was synthesized locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Live,
    Fallback,
}

/// One OHLC bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Bars sorted ascending by timestamp, tagged with where they came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub points: Vec<PricePoint>,
    pub provenance: Provenance,
}

impl PriceSeries {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        mut points: Vec<PricePoint>,
        provenance: Provenance,
    ) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self {
            symbol: symbol.into(),
            timeframe,
            points,
            provenance,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.provenance == Provenance::Live
    }

    pub fn last_close(&self) -> Option<f64> {
        self.points.last().map(|p| p.close)
    }
}

/// Parse chart bars from a payload.
///
/// Accepts a bare array or an object wrapping one under `data`, `points` or
/// `candles`. Each bar needs a timestamp (`timestamp`/`time`/`t`, RFC 3339 or
/// epoch seconds/millis) and a close (`close`/`price`/`c`); missing open, high
/// and low default to the close.
pub fn parse_points(payload: &Value) -> Result<Vec<PricePoint>, PriceError> {
    let bars = match payload {
        Value::Array(bars) => bars,
        Value::Object(obj) => ["data", "points", "candles"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array))
            .ok_or_else(|| PriceError::Malformed("no bar array in chart payload".to_string()))?,
        _ => {
            return Err(PriceError::Malformed(
                "chart payload is not an array or object".to_string(),
            ))
        }
    };

    bars.iter().map(parse_bar).collect()
}

fn parse_bar(bar: &Value) -> Result<PricePoint, PriceError> {
    let timestamp = field(bar, &["timestamp", "time", "t"])
        .and_then(parse_timestamp)
        .ok_or_else(|| PriceError::Malformed(format!("bar without timestamp: {}", bar)))?;
    let close = number(bar, &["close", "price", "c"])
        .ok_or_else(|| PriceError::Malformed(format!("bar without close: {}", bar)))?;

    let open = number(bar, &["open", "o"]).unwrap_or(close);
    let high = number(bar, &["high", "h"]).unwrap_or(open.max(close));
    let low = number(bar, &["low", "l"]).unwrap_or(open.min(close));
    let volume = number(bar, &["volume", "v"]).unwrap_or(0.0);

    Ok(PricePoint {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
    })
}

fn field<'a>(bar: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| bar.get(*k))
}

fn number(bar: &Value, keys: &[&str]) -> Option<f64> {
    field(bar, keys).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

/// RFC 3339 string, or epoch seconds / milliseconds
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            // anything past year ~2286 in seconds is really milliseconds
            if raw.abs() >= 10_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}
