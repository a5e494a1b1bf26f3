//! Prometheus metrics for the feed client
//!
//! Per-client metrics for connection state, inbound traffic and the outbound queue.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

const LABEL_CLIENT: &str = "client";
const LABEL_MESSAGE_TYPE: &str = "message_type";
const LABEL_REASON: &str = "reason";
const LABEL_CHANNEL: &str = "channel";

/// Connection state per client (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=failed)
static CONNECTION_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "feedlink_connection_state",
        "Connection state (0=disconnected,1=connecting,2=connected,3=reconnecting,4=failed)",
        &[LABEL_CLIENT]
    )
    .expect("Failed to register connection_state metric")
});

static FRAMES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feedlink_frames_received_total",
        "Inbound frames decoded, by message type",
        &[LABEL_CLIENT, LABEL_MESSAGE_TYPE]
    )
    .expect("Failed to register frames_received metric")
});

static FRAMES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feedlink_frames_dropped_total",
        "Inbound frames dropped, by reason",
        &[LABEL_CLIENT, LABEL_REASON]
    )
    .expect("Failed to register frames_dropped metric")
});

static RECONNECT_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feedlink_reconnect_attempts_total",
        "Reconnect attempts scheduled",
        &[LABEL_CLIENT]
    )
    .expect("Failed to register reconnect_attempts metric")
});

static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "feedlink_outbound_queue_depth",
        "Frames waiting for a connection",
        &[LABEL_CLIENT]
    )
    .expect("Failed to register outbound_queue_depth metric")
});

static CALLBACK_FAULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feedlink_callback_faults_total",
        "Subscriber callbacks that returned an error or panicked",
        &[LABEL_CLIENT, LABEL_CHANNEL]
    )
    .expect("Failed to register callback_faults metric")
});

static HEARTBEATS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feedlink_heartbeats_sent_total",
        "Heartbeat envelopes sent",
        &[LABEL_CLIENT]
    )
    .expect("Failed to register heartbeats_sent metric")
});

/// Handle for recording metrics for one client instance
#[derive(Clone, Debug)]
pub struct SyncMetrics {
    client: String,
}

impl SyncMetrics {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
        }
    }

    pub fn set_state(&self, code: i64) {
        CONNECTION_STATE.with_label_values(&[&self.client]).set(code);
    }

    pub fn inc_received(&self, message_type: &str) {
        FRAMES_RECEIVED
            .with_label_values(&[&self.client, message_type])
            .inc();
    }

    pub fn inc_dropped(&self, reason: &str) {
        FRAMES_DROPPED
            .with_label_values(&[&self.client, reason])
            .inc();
    }

    pub fn inc_reconnect(&self) {
        RECONNECT_ATTEMPTS.with_label_values(&[&self.client]).inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        QUEUE_DEPTH
            .with_label_values(&[&self.client])
            .set(depth as i64);
    }

    pub fn add_callback_faults(&self, channel: &str, faults: usize) {
        if faults > 0 {
            CALLBACK_FAULTS
                .with_label_values(&[&self.client, channel])
                .inc_by(faults as u64);
        }
    }

    pub fn inc_heartbeat(&self) {
        HEARTBEATS_SENT.with_label_values(&[&self.client]).inc();
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
