//! Application-level keepalive
//!
//! Sends `heartbeat {client_time, client_id}` on a fixed interval while the
//! connection is up. Liveness failures are detected by the transport, not here.

use chrono::Utc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::envelope::Outbound;

pub struct Heartbeat {
    period: Duration,
    client_id: String,
    ticker: Option<Interval>,
}

impl Heartbeat {
    pub fn new(period: Duration, client_id: impl Into<String>) -> Self {
        Self {
            period,
            client_id: client_id.into(),
            ticker: None,
        }
    }

    /// Start ticking; the first beat fires one full period from now
    pub fn start(&mut self) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    /// Stop immediately; a stopped heartbeat never yields another beat
    pub fn stop(&mut self) {
        self.ticker = None;
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Resolve at the next beat. Pends forever while stopped.
    pub async fn tick(&mut self) -> Outbound {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                self.beat()
            }
            None => std::future::pending().await,
        }
    }

    pub fn beat(&self) -> Outbound {
        Outbound::Heartbeat {
            client_time: Utc::now().timestamp_millis(),
            client_id: self.client_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval() {
        let mut hb = Heartbeat::new(Duration::from_secs(30), "desk-1");
        hb.start();

        let start = Instant::now();
        match hb.tick().await {
            Outbound::Heartbeat { client_id, .. } => assert_eq!(client_id, "desk-1"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(30));

        hb.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_never_ticks() {
        let mut hb = Heartbeat::new(Duration::from_secs(30), "desk-1");
        hb.start();
        hb.stop();
        assert!(!hb.is_running());

        let result = tokio::time::timeout(Duration::from_secs(300), hb.tick()).await;
        assert!(result.is_err());
    }
}
