//! FIFO buffer of serialized frames awaiting a live connection

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::transport::Connection;

#[derive(Debug, Default)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: String) {
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.frames.iter()
    }

    /// Drain head-to-tail into `conn`.
    ///
    /// On a send failure the failed frame goes back to the head, so the
    /// remaining frames keep their order for the next flush.
    pub async fn flush_into(&mut self, conn: &mut dyn Connection) -> Result<usize, SyncError> {
        let mut sent = 0;
        while let Some(frame) = self.frames.pop_front() {
            if let Err(e) = conn.send(frame.clone()).await {
                self.frames.push_front(frame);
                warn!(
                    sent,
                    remaining = self.frames.len(),
                    error = %e,
                    "Outbound flush interrupted"
                );
                return Err(e);
            }
            sent += 1;
        }
        if sent > 0 {
            debug!(sent, "Outbound queue flushed");
        }
        Ok(sent)
    }
}
