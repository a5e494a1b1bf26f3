//! Connection manager
//!
//! [`SyncClient`] is a cheap, cloneable handle. All connection state lives in a
//! single actor task that owns the transport connection, the outbound queue,
//! the heartbeat, the reconnect deadline and the pending-request table; the
//! handle talks to it over an unbounded command channel, so every transition is
//! applied in order on one task.
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake ok--> Connected
//!                               |                            |
//!                        handshake error              transport lost
//!                               v                            v
//!                   Reconnecting <-----------------------------
//!                     |      ^
//!            delay elapsed   | handshake error (attempts left)
//!                     v      |
//!                  Connecting
//!
//! Reconnecting --attempts exhausted--> Failed
//! any --disconnect()--> Disconnected
//! ```

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::envelope::{Envelope, Inbound, Outbound};
use crate::error::{ConfigError, SyncError};
use crate::heartbeat::Heartbeat;
use crate::metrics::SyncMetrics;
use crate::observer::{notify_all, Callback, HandlerResult, IdGen, ObserverId, Observers};
use crate::pending::{PendingRequests, Reply};
use crate::queue::OutboundQueue;
use crate::router::{MessageRouter, Removal};
use crate::transport::{Connection, Transport, WsTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    fn code(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Delivered to status listeners on connection changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Connected,
    Disconnected,
    /// Retries exhausted; no automatic attempts until `connect()` is called again
    Failed(String),
}

impl StatusEvent {
    pub fn is_connected(&self) -> bool {
        matches!(self, StatusEvent::Connected)
    }
}

/// Whether `send` wrote to the socket or parked the frame in the outbound queue.
/// Diagnostic only: both mean the frame will be delivered in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
}

enum Command {
    Connect {
        url: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Disconnect,
    Send {
        frame: String,
        reply: Option<oneshot::Sender<SendOutcome>>,
    },
    SubscribePrices {
        symbols: Vec<String>,
    },
    Request {
        request_id: String,
        symbol: String,
        frame: String,
        reply: Reply,
    },
}

#[derive(Default)]
struct StatusListeners {
    observers: Observers<StatusEvent>,
    ids: IdGen,
}

/// State shared by the handle and the actor
struct Shared {
    client_id: String,
    router: MessageRouter,
    listeners: Mutex<StatusListeners>,
    /// Set synchronously by `disconnect()`, cleared by `connect()`
    manual_disconnect: AtomicBool,
    queued: AtomicUsize,
    metrics: SyncMetrics,
}

impl Shared {
    fn listeners(&self) -> MutexGuard<'_, StatusListeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: StatusEvent) {
        let snapshot = self.listeners().observers.snapshot();
        let delivery = notify_all("status", &snapshot, &event);
        self.metrics.add_callback_faults("status", delivery.faults);
    }

    fn is_manual_disconnect(&self) -> bool {
        self.manual_disconnect.load(Ordering::SeqCst)
    }
}

/// Handle to the real-time feed connection
#[derive(Clone)]
pub struct SyncClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SyncClient {
    /// Create a client over the WebSocket transport.
    ///
    /// Spawns the connection actor, so this must be called inside a tokio runtime.
    pub fn new(config: SyncConfig) -> Result<Self, ConfigError> {
        let transport = Arc::new(WsTransport::new(config.max_message_size));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let metrics = SyncMetrics::new(client_id.clone());
        metrics.set_state(ConnectionState::Disconnected.code());

        let shared = Arc::new(Shared {
            client_id: client_id.clone(),
            router: MessageRouter::new(),
            listeners: Mutex::new(StatusListeners::default()),
            manual_disconnect: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            metrics,
        });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = ConnectionActor {
            transport,
            shared: Arc::clone(&shared),
            cmd_rx,
            state_tx,
            backoff: Backoff::new(
                config.reconnect_base_delay(),
                config.reconnect_max_delay(),
                config.max_reconnect_attempts,
            ),
            heartbeat: Heartbeat::new(config.heartbeat_interval_duration(), client_id),
            config,
            url: None,
            conn: None,
            handshake: None,
            connect_waiters: Vec::new(),
            queue: OutboundQueue::new(),
            attempts: 0,
            reconnect_at: None,
            pending: PendingRequests::new(),
            price_symbols: BTreeSet::new(),
        };
        tokio::spawn(actor.run());

        Ok(Self {
            cmd_tx,
            shared,
            state_rx,
        })
    }

    /// Connect to `url`.
    ///
    /// Resolves once connected. Fails if the handshake it started (or joined)
    /// fails; automatic retries continue in the background either way.
    /// A no-op when already connected.
    pub async fn connect(&self, url: &str) -> Result<(), SyncError> {
        self.shared.manual_disconnect.store(false, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect {
            url: url.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| SyncError::ClientClosed)?
    }

    /// Close the connection and stop all automatic retries. Idempotent.
    pub fn disconnect(&self) {
        self.shared.manual_disconnect.store(true, Ordering::SeqCst);
        // a closed actor is already disconnected
        let _ = self.command(Command::Disconnect);
    }

    /// Send an envelope now, or queue it until the next connection
    pub async fn send(&self, envelope: Envelope) -> Result<SendOutcome, SyncError> {
        let frame = envelope.encode()?;
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            frame,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| SyncError::ClientClosed)
    }

    /// Register `callback` for inbound envelopes of type `channel`.
    ///
    /// The first registration on a channel sends a wire `subscribe`.
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        let callback: Callback<Value> = Arc::new(callback);
        let registration = self.shared.router.register(channel, callback);
        if registration.first {
            debug!(channel = %channel, "First subscriber, subscribing on the wire");
            self.send_detached(Outbound::Subscribe {
                channels: vec![channel.to_string()],
            });
        }
        Subscription {
            channel: channel.to_string(),
            id: registration.id,
            client: self.clone(),
        }
    }

    /// Request price updates for `symbols`. Remembered and re-requested after every re-auth.
    pub fn subscribe_prices<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        if symbols.is_empty() {
            return;
        }
        let _ = self.command(Command::SubscribePrices { symbols });
    }

    /// One-shot chart request over the socket.
    ///
    /// Resolved by the matching `chart_data_response`. Fails with
    /// [`SyncError::RequestTimeout`] once the configured request timeout elapses.
    pub async fn request_chart_data(
        &self,
        symbol: &str,
        timeframe: &str,
        points: usize,
    ) -> Result<Value, SyncError> {
        let request_id = Uuid::new_v4().to_string();
        let frame = Outbound::GetChartData {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            points,
            request_id: request_id.clone(),
        }
        .encode()?;

        let (reply, rx) = oneshot::channel();
        self.command(Command::Request {
            request_id,
            symbol: symbol.to_string(),
            frame,
            reply,
        })?;
        rx.await.map_err(|_| SyncError::ClientClosed)?
    }

    pub fn add_status_listener<F>(&self, listener: F) -> ObserverId
    where
        F: Fn(&StatusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let mut listeners = self.shared.listeners();
        let id = listeners.ids.next_id();
        listeners.observers.add(id, Arc::new(listener));
        id
    }

    pub fn remove_status_listener(&self, id: ObserverId) -> bool {
        self.shared.listeners().observers.remove(id)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Frames waiting for a connection
    pub fn queued_len(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    fn command(&self, cmd: Command) -> Result<(), SyncError> {
        self.cmd_tx.send(cmd).map_err(|_| SyncError::ClientClosed)
    }

    fn send_detached(&self, msg: Outbound) {
        let kind = msg.kind();
        match msg.encode() {
            Ok(frame) => {
                let _ = self.command(Command::Send { frame, reply: None });
            }
            Err(e) => error!(kind, error = %e, "Failed to encode outbound message"),
        }
    }
}

/// Handle for one registered callback
pub struct Subscription {
    channel: String,
    id: ObserverId,
    client: SyncClient,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove this callback. The wire `unsubscribe` goes out when it was the last one.
    pub fn unsubscribe(self) {
        match self.client.shared.router.unregister(&self.channel, self.id) {
            Removal::LastRemoved => {
                debug!(channel = %self.channel, "Last subscriber left, unsubscribing on the wire");
                self.client.send_detached(Outbound::Unsubscribe {
                    channels: vec![self.channel.clone()],
                });
            }
            Removal::Removed | Removal::NotFound => {}
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

type Handshake = BoxFuture<'static, Result<Box<dyn Connection>, SyncError>>;

enum Event {
    Command(Option<Command>),
    Handshake(Result<Box<dyn Connection>, SyncError>),
    Frame(Option<Result<String, SyncError>>),
    Heartbeat(Outbound),
    ReconnectDue,
    RequestDeadline,
}

struct ConnectionActor {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    config: SyncConfig,
    backoff: Backoff,
    heartbeat: Heartbeat,
    url: Option<String>,
    conn: Option<Box<dyn Connection>>,
    handshake: Option<Handshake>,
    connect_waiters: Vec<oneshot::Sender<Result<(), SyncError>>>,
    queue: OutboundQueue,
    /// Retries scheduled since the last successful connection
    attempts: u32,
    reconnect_at: Option<Instant>,
    pending: PendingRequests,
    price_symbols: BTreeSet<String>,
}

impl ConnectionActor {
    async fn run(mut self) {
        debug!(client_id = %self.shared.client_id, "Feed client actor started");

        loop {
            let event = tokio::select! {
                cmd = self.cmd_rx.recv() => Event::Command(cmd),
                result = poll_handshake(self.handshake.as_mut()) => Event::Handshake(result),
                frame = recv_frame(self.conn.as_mut()) => Event::Frame(frame),
                beat = self.heartbeat.tick() => Event::Heartbeat(beat),
                _ = sleep_opt(self.reconnect_at) => Event::ReconnectDue,
                _ = sleep_opt(self.pending.next_deadline()) => Event::RequestDeadline,
            };

            match event {
                Event::Command(Some(cmd)) => self.on_command(cmd).await,
                Event::Command(None) => break,
                Event::Handshake(result) => {
                    self.handshake = None;
                    match result {
                        Ok(conn) => self.on_connected(conn).await,
                        Err(e) => self.on_handshake_failed(e),
                    }
                }
                Event::Frame(Some(Ok(frame))) => self.on_frame(&frame).await,
                Event::Frame(Some(Err(SyncError::Protocol(reason)))) => {
                    warn!(reason = %reason, "Dropping undecodable frame");
                    self.shared.metrics.inc_dropped("undecodable");
                }
                Event::Frame(Some(Err(e))) => self.on_connection_lost(e),
                Event::Frame(None) => self.on_connection_lost(SyncError::ConnectionClosed),
                Event::Heartbeat(beat) => self.on_heartbeat(beat).await,
                Event::ReconnectDue => self.on_reconnect_due(),
                Event::RequestDeadline => {
                    self.pending.expire(Instant::now());
                }
            }
        }

        self.shutdown().await;
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Connection state changed");
        }
        self.shared.metrics.set_state(next.code());
    }

    fn sync_queue_depth(&self) {
        self.shared.queued.store(self.queue.len(), Ordering::SeqCst);
        self.shared.metrics.set_queue_depth(self.queue.len());
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { url, reply } => self.on_connect(url, reply),
            Command::Disconnect => self.on_disconnect().await,
            Command::Send { frame, reply } => {
                let outcome = self.transmit(frame).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Command::SubscribePrices { symbols } => {
                self.price_symbols.extend(symbols.iter().cloned());
                info!(symbols = ?symbols, "Subscribing to prices");
                self.transmit_message(Outbound::SubscribePrices { symbols })
                    .await;
            }
            Command::Request {
                request_id,
                symbol,
                frame,
                reply,
            } => {
                self.pending.insert(
                    request_id.clone(),
                    symbol.clone(),
                    self.config.request_timeout_duration(),
                    reply,
                );
                debug!(
                    request_id = %request_id,
                    symbol = %symbol,
                    in_flight = self.pending.len(),
                    "Chart data request"
                );
                self.transmit(frame).await;
            }
        }
    }

    fn on_connect(&mut self, url: String, reply: oneshot::Sender<Result<(), SyncError>>) {
        match self.state() {
            ConnectionState::Connected => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting => self.connect_waiters.push(reply),
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Failed => {
                self.url = Some(url);
                self.attempts = 0;
                self.reconnect_at = None;
                self.connect_waiters.push(reply);
                self.start_handshake();
            }
        }
    }

    fn start_handshake(&mut self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        info!(url = %url, attempt = self.attempts, "Connecting to feed");
        self.set_state(ConnectionState::Connecting);

        let transport = Arc::clone(&self.transport);
        self.handshake = Some(Box::pin(async move { transport.connect(&url).await }));
    }

    async fn on_connected(&mut self, conn: Box<dyn Connection>) {
        self.conn = Some(conn);
        self.attempts = 0;
        self.set_state(ConnectionState::Connected);
        info!(client_id = %self.shared.client_id, "Feed connected");

        // auth goes out before anything that was queued
        let result = match self.conn.as_mut() {
            Some(conn) => match encode(Outbound::Auth {
                token: self.config.auth_token.clone(),
            }) {
                Some(auth) => match conn.send(auth).await {
                    Ok(()) => self.queue.flush_into(conn.as_mut()).await.map(|_| ()),
                    Err(e) => Err(e),
                },
                None => self.queue.flush_into(conn.as_mut()).await.map(|_| ()),
            },
            None => Ok(()),
        };
        self.sync_queue_depth();

        self.heartbeat.start();
        self.shared.notify(StatusEvent::Connected);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        if let Err(e) = result {
            self.on_connection_lost(e);
        }
    }

    fn on_handshake_failed(&mut self, e: SyncError) {
        warn!(attempt = self.attempts, error = %e, "Feed handshake failed");

        let reason = failure_reason(&e);
        if self.shared.is_manual_disconnect() {
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.schedule_reconnect(reason.clone());
        }

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::Connection(reason.clone())));
        }
    }

    fn on_connection_lost(&mut self, e: SyncError) {
        self.conn = None;
        self.heartbeat.stop();
        warn!(error = %e, "Feed connection lost");
        self.shared.notify(StatusEvent::Disconnected);

        if self.shared.is_manual_disconnect() {
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.schedule_reconnect(failure_reason(&e));
        }
    }

    fn schedule_reconnect(&mut self, reason: String) {
        match self.backoff.next_delay(self.attempts) {
            Some(delay) => {
                self.attempts += 1;
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_state(ConnectionState::Reconnecting);
                self.shared.metrics.inc_reconnect();
                info!(
                    attempt = self.attempts,
                    max_attempts = self.backoff.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
            }
            None => {
                let attempts = self.attempts;
                error!(attempts, reason = %reason, "Reconnect attempts exhausted");
                self.reconnect_at = None;
                self.set_state(ConnectionState::Failed);
                self.pending
                    .fail_all(|| SyncError::RetriesExhausted { attempts });
                self.shared.notify(StatusEvent::Failed(
                    SyncError::RetriesExhausted { attempts }.to_string(),
                ));
            }
        }
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if self.shared.is_manual_disconnect() {
            debug!("Reconnect suppressed by manual disconnect");
            return;
        }
        self.start_handshake();
    }

    async fn on_disconnect(&mut self) {
        let was_connected = self.conn.is_some();
        self.handshake = None;
        self.reconnect_at = None;
        self.heartbeat.stop();

        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing feed connection");
            }
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::ConnectionClosed));
        }
        self.pending.fail_all(|| SyncError::ConnectionClosed);

        if self.state() != ConnectionState::Disconnected {
            info!("Feed disconnected by caller");
        }
        self.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.shared.notify(StatusEvent::Disconnected);
        }
    }

    async fn on_heartbeat(&mut self, beat: Outbound) {
        let Some(frame) = encode(beat) else {
            return;
        };
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        match conn.send(frame).await {
            Ok(()) => {
                trace!("Heartbeat sent");
                self.shared.metrics.inc_heartbeat();
            }
            Err(e) => self.on_connection_lost(e),
        }
    }

    /// Write to the live connection, or append to the queue when there is none
    async fn transmit(&mut self, frame: String) -> SendOutcome {
        if let Some(conn) = self.conn.as_mut() {
            match conn.send(frame.clone()).await {
                Ok(()) => return SendOutcome::Sent,
                Err(e) => {
                    self.queue.push(frame);
                    self.sync_queue_depth();
                    self.on_connection_lost(e);
                    return SendOutcome::Queued;
                }
            }
        }
        self.queue.push(frame);
        self.sync_queue_depth();
        SendOutcome::Queued
    }

    async fn transmit_message(&mut self, msg: Outbound) {
        if let Some(frame) = encode(msg) {
            self.transmit(frame).await;
        }
    }

    async fn on_frame(&mut self, frame: &str) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.shared.metrics.inc_dropped("malformed");
                return;
            }
        };
        let msg = match Inbound::classify(&envelope) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(kind = %envelope.kind(), error = %e, "Dropping frame with invalid payload");
                self.shared.metrics.inc_dropped("invalid_payload");
                return;
            }
        };
        self.shared.metrics.inc_received(msg.label());
        let control = msg.is_control();

        match msg {
            Inbound::AuthResponse(resp) => {
                if resp.is_success() {
                    info!("Feed authenticated");
                    self.resubscribe().await;
                } else {
                    warn!(status = %resp.status, message = ?resp.message, "Feed authentication rejected");
                }
            }
            Inbound::ConnectionStatus(status) => {
                debug!(connected = status.connected, "Server connection status");
            }
            Inbound::HeartbeatResponse => trace!("Heartbeat acknowledged"),
            Inbound::PriceSubscriptionResponse(resp) => {
                debug!(status = %resp.status, symbols = ?resp.symbols, "Price subscription acknowledged");
            }
            Inbound::SubscriptionAck => debug!(kind = %envelope.kind(), "Subscription acknowledged"),
            Inbound::ChartDataResponse(resp) => {
                self.pending
                    .resolve(resp.request_id.as_deref(), &resp.symbol, resp.data);
            }
            Inbound::Unrecognized => trace!(kind = %envelope.kind(), "Unrecognized message type"),
            Inbound::PriceUpdate(_) | Inbound::Channel(_) => {}
        }

        if !control {
            self.dispatch(&envelope);
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        let delivery = self
            .shared
            .router
            .dispatch(envelope.kind(), envelope.data());
        self.shared
            .metrics
            .add_callback_faults(envelope.kind(), delivery.faults);
    }

    /// Standard channels plus every channel with a live subscriber, then prices
    async fn resubscribe(&mut self) {
        let mut channels: BTreeSet<String> = self.config.standard_channels.iter().cloned().collect();
        channels.extend(self.shared.router.channels());
        if !channels.is_empty() {
            debug!(channels = ?channels, "Resubscribing");
            self.transmit_message(Outbound::Subscribe {
                channels: channels.into_iter().collect(),
            })
            .await;
        }
        if !self.price_symbols.is_empty() {
            let symbols = self.price_symbols.iter().cloned().collect();
            self.transmit_message(Outbound::SubscribePrices { symbols })
                .await;
        }
    }

    async fn shutdown(&mut self) {
        self.heartbeat.stop();
        self.handshake = None;
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.close().await;
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::ClientClosed));
        }
        self.pending.fail_all(|| SyncError::ClientClosed);
        self.set_state(ConnectionState::Disconnected);
        debug!(client_id = %self.shared.client_id, "Feed client actor stopped");
    }
}

async fn poll_handshake(
    handshake: Option<&mut Handshake>,
) -> Result<Box<dyn Connection>, SyncError> {
    match handshake {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn recv_frame(conn: Option<&mut Box<dyn Connection>>) -> Option<Result<String, SyncError>> {
    match conn {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn encode(msg: Outbound) -> Option<String> {
    let kind = msg.kind();
    match msg.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(kind, error = %e, "Failed to encode outbound message");
            None
        }
    }
}

fn failure_reason(e: &SyncError) -> String {
    match e {
        SyncError::Connection(reason) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;

    fn config() -> SyncConfig {
        SyncConfig::default()
            .client_id("unit-test")
            .standard_channels(Vec::<String>::new())
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let transport = MemoryTransport::new();
        let client = SyncClient::with_transport(config(), Arc::new(transport.clone())).unwrap();

        client.connect("ws://feed").await.unwrap();
        client.connect("ws://feed").await.unwrap();
        assert!(client.is_connected());
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_queued() {
        let transport = MemoryTransport::new();
        let client = SyncClient::with_transport(config(), Arc::new(transport.clone())).unwrap();

        let outcome = client
            .send(Envelope::new("command", serde_json::json!({"id": 1})))
            .await
            .unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(client.queued_len(), 1);

        client.connect("ws://feed").await.unwrap();
        assert_eq!(client.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = MemoryTransport::new();
        let client = SyncClient::with_transport(config(), Arc::new(transport.clone())).unwrap();

        client.disconnect();
        client.disconnect();
        client.connect("ws://feed").await.unwrap();
        client.disconnect();
        client.disconnect();

        let mut state = client.watch_state();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_failure_rejects_connect() {
        let transport = MemoryTransport::new();
        transport.fail_next_connects(1);
        let client = SyncClient::with_transport(config(), Arc::new(transport.clone())).unwrap();

        let err = client.connect("ws://feed").await.unwrap_err();
        assert!(matches!(err, SyncError::Connection(_)));
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        // the background retry still succeeds
        let mut state = client.watch_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(transport.connect_attempts(), 2);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Failed.code(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_rejects_pending_request() {
        let transport = MemoryTransport::new();
        let client = SyncClient::with_transport(config(), Arc::new(transport.clone())).unwrap();
        client.connect("ws://feed").await.unwrap();

        let requester = client.clone();
        let request =
            tokio::spawn(async move { requester.request_chart_data("EURUSD", "1h", 10).await });

        // auth, then the request itself
        transport.next_sent().await.unwrap();
        let sent = transport.next_sent_envelope().await.unwrap();
        assert_eq!(sent.kind(), "get_chart_data");

        client.disconnect();
        let result = request.await.unwrap();
        assert!(matches!(result, Err(SyncError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let transport = MemoryTransport::new();
        let mut bad = config();
        bad.heartbeat_interval_secs = 0;
        let result = SyncClient::with_transport(bad, Arc::new(transport));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
