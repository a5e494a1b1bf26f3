//! Transport seam for the connection manager
//!
//! [`Transport`] opens a [`Connection`]; the client only ever sees text frames.
//! [`WsTransport`] is the production WebSocket implementation; tests plug in
//! an in-memory transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{info, trace};
use url::Url;

use crate::error::SyncError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake with the peer at `url`
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, SyncError>;
}

/// An established duplex connection carrying text frames
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: String) -> Result<(), SyncError>;

    /// Next inbound text frame. `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    async fn close(&mut self) -> Result<(), SyncError>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsTransport {
    max_message_size: usize,
}

impl WsTransport {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(2_097_152)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, SyncError> {
        let url = Url::parse(url).map_err(|e| SyncError::Connection(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(SyncError::Connection(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        }

        info!(url = %url, "Connecting to feed WebSocket");

        let config = WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..Default::default()
        };

        let (ws, response) = connect_async_with_config(url.as_str(), Some(config), false).await?;

        info!(status = ?response.status(), "Feed WebSocket connected");

        Ok(Box::new(WsConnection { ws }))
    }
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: String) -> Result<(), SyncError> {
        self.ws.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8(data).map_err(|e| {
                        SyncError::Protocol(format!("binary frame is not UTF-8: {}", e))
                    }))
                }
                Ok(Message::Ping(data)) => {
                    trace!("Received WS ping, sending pong");
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(frame = ?frame, "Feed WebSocket closed by peer");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.ws.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let transport = WsTransport::default();
        let result = transport.connect("http://localhost:8080/ws").await;
        assert!(matches!(result, Err(SyncError::Connection(_))));
    }

    #[tokio::test]
    async fn test_rejects_unparseable_url() {
        let transport = WsTransport::default();
        let result = transport.connect("not a url").await;
        assert!(matches!(result, Err(SyncError::Connection(_))));
    }
}
