//! Feed client configuration
//!
//! Loads from explicit values, environment variables, or a YAML file.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Channels (re)subscribed after every successful authentication
pub const STANDARD_CHANNELS: &[&str] = &[
    "ea_updates",
    "portfolio_updates",
    "news_updates",
    "command_updates",
    "trade_updates",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Token carried by the `auth` envelope sent after each handshake
    pub auth_token: String,
    /// Identifier carried by heartbeats; generated when absent
    pub client_id: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub request_timeout_secs: u64,
    pub standard_channels: Vec<String>,
    /// Max inbound WebSocket message size in bytes
    pub max_message_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auth_token: "anonymous".to_string(),
            client_id: None,
            heartbeat_interval_secs: 30,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
            request_timeout_secs: 10,
            standard_channels: STANDARD_CHANNELS.iter().map(|c| c.to_string()).collect(),
            max_message_size: 2_097_152,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// All variables are optional; unset ones keep their defaults:
    /// - `FEEDLINK_AUTH_TOKEN`
    /// - `FEEDLINK_CLIENT_ID`
    /// - `FEEDLINK_HEARTBEAT_SECS`
    /// - `FEEDLINK_RECONNECT_BASE_MS`
    /// - `FEEDLINK_RECONNECT_MAX_MS`
    /// - `FEEDLINK_MAX_RECONNECT_ATTEMPTS`
    /// - `FEEDLINK_REQUEST_TIMEOUT_SECS`
    /// - `FEEDLINK_STANDARD_CHANNELS` (comma separated)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(token) = env::var("FEEDLINK_AUTH_TOKEN") {
            config.auth_token = token;
        }
        if let Ok(id) = env::var("FEEDLINK_CLIENT_ID") {
            if !id.is_empty() {
                config.client_id = Some(id);
            }
        }
        if let Some(v) = parse_env("FEEDLINK_HEARTBEAT_SECS")? {
            config.heartbeat_interval_secs = v;
        }
        if let Some(v) = parse_env("FEEDLINK_RECONNECT_BASE_MS")? {
            config.reconnect_base_delay_ms = v;
        }
        if let Some(v) = parse_env("FEEDLINK_RECONNECT_MAX_MS")? {
            config.reconnect_max_delay_ms = v;
        }
        if let Some(v) = parse_env("FEEDLINK_MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = v;
        }
        if let Some(v) = parse_env("FEEDLINK_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = v;
        }
        if let Ok(channels) = env::var("FEEDLINK_STANDARD_CHANNELS") {
            config.standard_channels = channels
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat interval must be > 0".to_string(),
            ));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect base delay must be > 0".to_string(),
            ));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect max delay must be >= base delay".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay_ms = base.as_millis() as u64;
        self.reconnect_max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn standard_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.standard_channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn heartbeat_interval_duration(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{} is not a valid number: {}", name, raw))),
        Err(_) => Ok(None),
    }
}
