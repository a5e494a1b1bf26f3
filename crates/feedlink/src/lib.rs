//! feedlink: Real-time feed synchronization client
//!
//! Maintains one persistent duplex connection to a market/telemetry feed,
//! reconnects with exponential backoff, multiplexes channel subscriptions over
//! the connection, and queues outbound messages across reconnects.

pub mod backoff;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod heartbeat;
pub mod memory;
pub mod metrics;
pub mod observer;
mod pending;
pub mod queue;
pub mod router;
pub mod transport;

pub use backoff::Backoff;
pub use client::{ConnectionState, SendOutcome, StatusEvent, Subscription, SyncClient};
pub use config::{SyncConfig, STANDARD_CHANNELS};
pub use envelope::{AppChannel, Envelope, Inbound, Outbound, PriceTick, PriceUpdate};
pub use error::{ConfigError, SyncError};
pub use memory::MemoryTransport;
pub use metrics::{encode_metrics, SyncMetrics};
pub use observer::{HandlerError, HandlerResult, ObserverId};
pub use transport::{Connection, Transport, WsTransport};
