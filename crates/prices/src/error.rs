use thiserror::Error;

#[derive(Error, Debug)]
pub enum PriceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("price service returned error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("feed error: {0}")]
    Sync(#[from] feedlink::SyncError),

    #[error("config error: {0}")]
    Config(#[from] feedlink::ConfigError),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),
}
