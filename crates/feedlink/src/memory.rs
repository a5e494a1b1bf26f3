//! In-memory transport for tests and local development
//!
//! The [`MemoryTransport`] plays the server side: it records every frame the
//! client sends, lets the caller push inbound frames, and can refuse handshakes
//! or break the live connection on demand.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::SyncError;
use crate::transport::{Connection, Transport};

enum PeerEvent {
    Frame(String),
    Close,
    Error(String),
}

#[derive(Default)]
struct State {
    refuse: bool,
    fail_next_connects: u32,
    connect_attempts: u32,
    /// Remaining successful sends before sends start failing
    sends_before_failure: Option<usize>,
    peer: Option<mpsc::UnboundedSender<PeerEvent>>,
    sent: Vec<String>,
}

struct Shared {
    state: Mutex<State>,
    sent_tx: mpsc::UnboundedSender<String>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                sent_tx,
                sent_rx: tokio::sync::Mutex::new(sent_rx),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every handshake while set
    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse = refuse;
    }

    /// Fail the next `n` handshakes, then accept
    pub fn fail_next_connects(&self, n: u32) {
        self.state().fail_next_connects = n;
    }

    /// Let `n` more sends succeed, then fail every send until reset with `None`
    pub fn fail_sends_after(&self, n: Option<usize>) {
        self.state().sends_before_failure = n;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state()
            .peer
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Deliver a raw frame to the live connection. Returns false when nothing is connected.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        match self.state().peer.as_ref() {
            Some(tx) => tx.send(PeerEvent::Frame(frame.into())).is_ok(),
            None => false,
        }
    }

    pub fn push_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(frame) => self.push(frame),
            Err(_) => false,
        }
    }

    /// Close the live connection from the server side
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state().peer.take() {
            let _ = tx.send(PeerEvent::Close);
        }
    }

    /// Fail the live connection with a transport error
    pub fn break_connection(&self, reason: impl Into<String>) {
        if let Some(tx) = self.state().peer.take() {
            let _ = tx.send(PeerEvent::Error(reason.into()));
        }
    }

    /// Every frame successfully sent so far, across connections
    pub fn sent_frames(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Wait for the next frame the client sends
    pub async fn next_sent(&self) -> Option<String> {
        self.shared.sent_rx.lock().await.recv().await
    }

    /// Next sent frame decoded as an envelope
    pub async fn next_sent_envelope(&self) -> Option<Envelope> {
        let frame = self.next_sent().await?;
        Envelope::decode(&frame).ok()
    }

    /// Next sent frame if one is already buffered
    pub fn try_next_sent(&self) -> Option<String> {
        self.shared.sent_rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, SyncError> {
        let mut state = self.state();
        state.connect_attempts += 1;

        if state.refuse {
            return Err(SyncError::Connection(format!("{} refused connection", url)));
        }
        if state.fail_next_connects > 0 {
            state.fail_next_connects -= 1;
            return Err(SyncError::Connection(format!("{} refused connection", url)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // a new handshake supersedes any previous peer
        if let Some(old) = state.peer.replace(tx) {
            let _ = old.send(PeerEvent::Close);
        }

        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            peer_rx: rx,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, frame: String) -> Result<(), SyncError> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(remaining) = state.sends_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(SyncError::Connection("send failed".to_string()));
            }
            *remaining -= 1;
        }

        state.sent.push(frame.clone());
        let _ = self.shared.sent_tx.send(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        match self.peer_rx.recv().await {
            Some(PeerEvent::Frame(frame)) => Some(Ok(frame)),
            Some(PeerEvent::Error(reason)) => Some(Err(SyncError::Connection(reason))),
            Some(PeerEvent::Close) | None => None,
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.peer_rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_send_recv() {
        let transport = MemoryTransport::new();
        let mut conn = transport.connect("ws://test").await.unwrap();
        assert!(transport.is_connected());

        conn.send("hello".to_string()).await.unwrap();
        assert_eq!(transport.next_sent().await.as_deref(), Some("hello"));

        assert!(transport.push("world"));
        assert_eq!(conn.recv().await.unwrap().unwrap(), "world");

        transport.drop_connection();
        assert!(conn.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_next_connects() {
        let transport = MemoryTransport::new();
        transport.fail_next_connects(2);

        assert!(transport.connect("ws://test").await.is_err());
        assert!(transport.connect("ws://test").await.is_err());
        assert!(transport.connect("ws://test").await.is_ok());
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_fail_sends_after() {
        let transport = MemoryTransport::new();
        let mut conn = transport.connect("ws://test").await.unwrap();
        transport.fail_sends_after(Some(1));

        assert!(conn.send("a".to_string()).await.is_ok());
        assert!(conn.send("b".to_string()).await.is_err());
        assert_eq!(transport.sent_frames(), vec!["a".to_string()]);
    }
}
