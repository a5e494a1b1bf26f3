//! Wire envelope codec
//!
//! Every frame on the socket is a JSON object `{"type": <string>, "data": <object>}`.
//! Outbound messages are built from [`Outbound`]; inbound frames decode into an
//! [`Envelope`] and are then classified into an [`Inbound`] variant.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::SyncError;

/// Raw `{type, data}` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame. Malformed JSON or a missing `type` is a protocol error.
    pub fn decode(frame: &str) -> Result<Self, SyncError> {
        let envelope: Self = serde_json::from_str(frame)
            .map_err(|e| SyncError::Protocol(format!("undecodable frame: {}", e)))?;
        if envelope.kind.is_empty() {
            return Err(SyncError::Protocol("empty message type".to_string()));
        }
        Ok(envelope)
    }
}

/// Messages produced by the client
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Auth {
        token: String,
    },
    Subscribe {
        channels: Vec<String>,
    },
    Unsubscribe {
        channels: Vec<String>,
    },
    SubscribePrices {
        symbols: Vec<String>,
    },
    Heartbeat {
        client_time: i64,
        client_id: String,
    },
    GetChartData {
        symbol: String,
        timeframe: String,
        points: usize,
        request_id: String,
    },
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Auth { .. } => "auth",
            Outbound::Subscribe { .. } => "subscribe",
            Outbound::Unsubscribe { .. } => "unsubscribe",
            Outbound::SubscribePrices { .. } => "subscribe_prices",
            Outbound::Heartbeat { .. } => "heartbeat",
            Outbound::GetChartData { .. } => "get_chart_data",
        }
    }

    pub fn encode(self) -> Result<String, SyncError> {
        Envelope::from(self).encode()
    }
}

impl From<Outbound> for Envelope {
    fn from(msg: Outbound) -> Self {
        let kind = msg.kind();
        let data = match msg {
            Outbound::Auth { token } => json!({ "token": token }),
            Outbound::Subscribe { channels } => json!({ "channels": channels }),
            Outbound::Unsubscribe { channels } => json!({ "channels": channels }),
            Outbound::SubscribePrices { symbols } => json!({ "symbols": symbols }),
            Outbound::Heartbeat {
                client_time,
                client_id,
            } => json!({ "client_time": client_time, "client_id": client_id }),
            Outbound::GetChartData {
                symbol,
                timeframe,
                points,
                request_id,
            } => json!({
                "symbol": symbol,
                "timeframe": timeframe,
                "points": points,
                "request_id": request_id,
            }),
        };
        Envelope::new(kind, data)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl AuthResponse {
    pub fn is_success(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "success" | "ok" | "authenticated"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceSubscriptionResponse {
    pub status: String,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// One symbol's entry in a `price_update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub price: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub spread: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    /// Feed timestamp, passed through as sent (ISO string or epoch number)
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// `price_update` payload: symbol -> tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceUpdate(pub HashMap<String, PriceTick>);

impl PriceUpdate {
    pub fn from_value(data: &Value) -> Result<Self, SyncError> {
        Ok(Self::deserialize(data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChartDataResponse {
    pub symbol: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Application channels whose payloads are opaque to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppChannel {
    EaUpdates,
    PortfolioUpdates,
    NewsUpdates,
    CommandUpdates,
    TradeUpdates,
}

impl AppChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppChannel::EaUpdates => "ea_updates",
            AppChannel::PortfolioUpdates => "portfolio_updates",
            AppChannel::NewsUpdates => "news_updates",
            AppChannel::CommandUpdates => "command_updates",
            AppChannel::TradeUpdates => "trade_updates",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "ea_updates" => Some(AppChannel::EaUpdates),
            "portfolio_updates" => Some(AppChannel::PortfolioUpdates),
            "news_updates" => Some(AppChannel::NewsUpdates),
            "command_updates" => Some(AppChannel::CommandUpdates),
            "trade_updates" => Some(AppChannel::TradeUpdates),
            _ => None,
        }
    }
}

/// Classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    AuthResponse(AuthResponse),
    ConnectionStatus(ConnectionStatus),
    HeartbeatResponse,
    PriceSubscriptionResponse(PriceSubscriptionResponse),
    /// `subscription_response`, `subscribed`, `unsubscribed`
    SubscriptionAck,
    PriceUpdate(PriceUpdate),
    ChartDataResponse(ChartDataResponse),
    Channel(AppChannel),
    /// Unknown type; still routed to any local subscribers of that name
    Unrecognized,
}

impl Inbound {
    /// Classify a decoded envelope, validating payloads of typed messages
    pub fn classify(envelope: &Envelope) -> Result<Self, SyncError> {
        let data = envelope.data();
        let msg = match envelope.kind() {
            "auth_response" => Inbound::AuthResponse(parse_payload(envelope)?),
            "connection_status" => Inbound::ConnectionStatus(parse_payload(envelope)?),
            "heartbeat_response" => Inbound::HeartbeatResponse,
            "price_subscription_response" => {
                Inbound::PriceSubscriptionResponse(parse_payload(envelope)?)
            }
            "subscription_response" | "subscribed" | "unsubscribed" => Inbound::SubscriptionAck,
            "price_update" => Inbound::PriceUpdate(PriceUpdate::from_value(data).map_err(|e| {
                SyncError::Protocol(format!("invalid price_update payload: {}", e))
            })?),
            "chart_data_response" => Inbound::ChartDataResponse(parse_payload(envelope)?),
            other => match AppChannel::from_kind(other) {
                Some(channel) => Inbound::Channel(channel),
                None => Inbound::Unrecognized,
            },
        };
        Ok(msg)
    }

    /// Control messages drive client state and never reach user callbacks
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Inbound::AuthResponse(_)
                | Inbound::ConnectionStatus(_)
                | Inbound::HeartbeatResponse
                | Inbound::PriceSubscriptionResponse(_)
                | Inbound::SubscriptionAck
        )
    }

    /// Metrics label; bounded so unknown types don't explode cardinality
    pub fn label(&self) -> &'static str {
        match self {
            Inbound::AuthResponse(_) => "auth_response",
            Inbound::ConnectionStatus(_) => "connection_status",
            Inbound::HeartbeatResponse => "heartbeat_response",
            Inbound::PriceSubscriptionResponse(_) => "price_subscription_response",
            Inbound::SubscriptionAck => "subscription_ack",
            Inbound::PriceUpdate(_) => "price_update",
            Inbound::ChartDataResponse(_) => "chart_data_response",
            Inbound::Channel(channel) => channel.as_str(),
            Inbound::Unrecognized => "unrecognized",
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, SyncError> {
    T::deserialize(envelope.data()).map_err(|e| {
        SyncError::Protocol(format!("invalid {} payload: {}", envelope.kind(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_wire_shape() {
        let frame = Outbound::Subscribe {
            channels: vec!["ea_updates".to_string()],
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["data"]["channels"][0], "ea_updates");

        let frame = Outbound::Heartbeat {
            client_time: 1_700_000_000_000,
            client_id: "desk-1".to_string(),
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["data"]["client_time"], 1_700_000_000_000i64);
        assert_eq!(value["data"]["client_id"], "desk-1");
    }

    #[test]
    fn test_chart_request_shape() {
        let env = Envelope::from(Outbound::GetChartData {
            symbol: "EURUSD".to_string(),
            timeframe: "1h".to_string(),
            points: 100,
            request_id: "r-1".to_string(),
        });
        assert_eq!(env.kind(), "get_chart_data");
        assert_eq!(env.data()["points"], 100);
        assert_eq!(env.data()["request_id"], "r-1");
    }

    #[test]
    fn test_decode_missing_type_is_protocol_error() {
        let result = Envelope::decode(r#"{"data":{}}"#);
        assert!(matches!(result, Err(SyncError::Protocol(_))));

        let result = Envelope::decode("not json");
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[test]
    fn test_decode_without_data_defaults_to_null() {
        let env = Envelope::decode(r#"{"type":"heartbeat_response"}"#).unwrap();
        assert_eq!(env.kind(), "heartbeat_response");
        assert!(env.data().is_null());
        assert_eq!(Inbound::classify(&env).unwrap(), Inbound::HeartbeatResponse);
    }

    #[test]
    fn test_classify_price_update() {
        let env = Envelope::decode(
            r#"{"type":"price_update","data":{"EURUSD":{"price":1.085,"bid":1.0849,"ask":1.0851,"spread":0.0002,"volume":1200,"timestamp":"2024-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();
        match Inbound::classify(&env).unwrap() {
            Inbound::PriceUpdate(update) => {
                let tick = &update.0["EURUSD"];
                assert_eq!(tick.price, 1.085);
                assert_eq!(tick.bid, Some(1.0849));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_bad_price_update_rejected() {
        let env = Envelope::new("price_update", json!({"EURUSD": {"bid": 1.0}}));
        assert!(matches!(
            Inbound::classify(&env),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_classify_control_and_channels() {
        let env = Envelope::new("auth_response", json!({"status": "success"}));
        let msg = Inbound::classify(&env).unwrap();
        assert!(msg.is_control());
        match msg {
            Inbound::AuthResponse(r) => assert!(r.is_success()),
            other => panic!("unexpected {:?}", other),
        }

        let env = Envelope::new("portfolio_updates", json!({"equity": 10_000}));
        let msg = Inbound::classify(&env).unwrap();
        assert_eq!(msg, Inbound::Channel(AppChannel::PortfolioUpdates));
        assert!(!msg.is_control());

        let env = Envelope::new("risk_alerts", json!({}));
        let msg = Inbound::classify(&env).unwrap();
        assert_eq!(msg, Inbound::Unrecognized);
        assert_eq!(msg.label(), "unrecognized");
    }

    #[test]
    fn test_auth_rejected() {
        let resp = AuthResponse {
            status: "error".to_string(),
            message: Some("bad token".to_string()),
        };
        assert!(!resp.is_success());
    }
}
