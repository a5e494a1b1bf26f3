//! One-shot requests awaiting a response frame
//!
//! Owned by the connection actor, so no interior locking. Each entry carries
//! its own deadline; the actor sleeps until the earliest one and expires
//! whatever is due.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SyncError;

pub(crate) type Reply = oneshot::Sender<Result<Value, SyncError>>;

struct PendingRequest {
    symbol: String,
    seq: u64,
    deadline: Instant,
    timeout: Duration,
    reply: Reply,
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    requests: HashMap<String, PendingRequest>,
    next_seq: u64,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request_id: String, symbol: String, timeout: Duration, reply: Reply) {
        self.next_seq += 1;
        let pending = PendingRequest {
            symbol,
            seq: self.next_seq,
            deadline: Instant::now() + timeout,
            timeout,
            reply,
        };
        if let Some(replaced) = self.requests.insert(request_id.clone(), pending) {
            warn!(request_id = %request_id, "Duplicate request id, rejecting the older request");
            let _ = replaced.reply.send(Err(SyncError::Protocol(format!(
                "request {} superseded",
                request_id
            ))));
        }
    }

    /// Resolve by `request_id` when the response echoes one, else the oldest
    /// outstanding request for `symbol`. A response for an id that is no
    /// longer pending is dropped. Returns whether a request matched.
    pub fn resolve(&mut self, request_id: Option<&str>, symbol: &str, data: Value) -> bool {
        let key = match request_id {
            Some(id) => id.to_string(),
            None => match self
                .requests
                .iter()
                .filter(|(_, p)| p.symbol == symbol)
                .min_by_key(|(_, p)| p.seq)
            {
                Some((id, _)) => id.clone(),
                None => {
                    debug!(symbol = %symbol, "Chart response with no pending request");
                    return false;
                }
            },
        };

        let Some(pending) = self.requests.remove(&key) else {
            debug!(request_id = %key, symbol = %symbol, "Dropping response for expired or unknown request");
            return false;
        };
        let _ = pending.reply.send(Ok(data));
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.requests.values().map(|p| p.deadline).min()
    }

    /// Reject every request whose deadline is at or before `now`
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .requests
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for request_id in &expired {
            if let Some(pending) = self.requests.remove(request_id) {
                warn!(
                    request_id = %request_id,
                    symbol = %pending.symbol,
                    "Chart request timed out"
                );
                let _ = pending.reply.send(Err(SyncError::RequestTimeout {
                    request_id: request_id.clone(),
                    timeout_ms: pending.timeout.as_millis() as u64,
                }));
            }
        }
        expired.len()
    }

    /// Reject every outstanding request with the error produced by `err`
    pub fn fail_all(&mut self, err: impl Fn() -> SyncError) {
        for (_, pending) in self.requests.drain() {
            let _ = pending.reply.send(Err(err()));
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
