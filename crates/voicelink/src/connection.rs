use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use voicelink_protocol::{decode, encode, Message};

mod config;
mod consts;
mod error;
mod inbound;
mod state;
mod stats;
mod utils;

pub use config::{BackoffPolicy, Config, ConfigBuilder};
pub use error::ConnectionError;
pub use inbound::Inbound;
pub use state::{CloseKind, ConnectionSession, ConnectionState};
pub use stats::Stats;

type EventTx = broadcast::Sender<Inbound>;
pub type EventRx = broadcast::Receiver<Inbound>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Connect(oneshot::Sender<Result<(), ConnectionError>>),
    Disconnect(oneshot::Sender<()>),
    Reset(oneshot::Sender<()>),
    Send(Message),
}

/// How the driver left a connected socket.
enum Exit {
    Closed(CloseKind),
    /// Explicit disconnect; the session has already been updated.
    Disconnected,
    /// Every handle was dropped.
    Shutdown,
}

/// Owns one logical socket session.
///
/// All socket I/O, the reconnect timer and the state machine live in a
/// single driver task. This handle talks to it through a command mailbox,
/// observes state through a watch channel and receives decoded inbound
/// messages through a broadcast channel. Dropping every handle shuts the
/// driver down.
pub struct ConnectionManager {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    events_tx: EventTx,
    stats: Arc<Mutex<Stats>>,
}

impl ConnectionManager {
    /// Spawns the driver task. Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.capacity());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(config.capacity());
        let stats = Arc::new(Mutex::new(Stats::new()));

        let driver = Driver {
            session: ConnectionSession::new(config.backoff()),
            config,
            cmd_rx,
            state_tx,
            events_tx: events_tx.clone(),
            stats: stats.clone(),
        };
        tokio::spawn(driver.run());

        Self {
            cmd_tx,
            state_rx,
            events_tx,
            stats,
        }
    }

    /// Starts connecting. Returns once the dial has been initiated, not
    /// once the socket is open; watch `state_changes` for `Connected`.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Connect(tx)).await?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Closes the socket cleanly and cancels any pending reconnect.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Disconnect(tx)).await?;
        rx.await.map_err(|_| ConnectionError::Closed)
    }

    /// Leaves `Failed` so that `connect` is accepted again.
    pub async fn reset(&self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Reset(tx)).await?;
        rx.await.map_err(|_| ConnectionError::Closed)
    }

    /// Encodes and sends a message. Rejected unless the socket is connected.
    pub async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Connected {
            self.record(Stats::record_dropped);
            return Err(ConnectionError::NotConnected);
        }
        self.command(Command::Send(message)).await
    }

    /// Sends a captured audio chunk. Chunks submitted while not connected
    /// are dropped, never queued.
    pub fn send_audio(&self, bytes: Vec<u8>) {
        if self.state() != ConnectionState::Connected {
            tracing::trace!(len = bytes.len(), "dropping audio frame while not connected");
            self.record(Stats::record_dropped);
            return;
        }
        if let Err(e) = self.cmd_tx.try_send(Command::Send(Message::Audio(bytes))) {
            tracing::warn!("failed to queue audio frame: {}", e);
            self.record(Stats::record_dropped);
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to decoded inbound messages.
    pub fn subscribe(&self) -> EventRx {
        self.events_tx.subscribe()
    }

    pub fn stats(&self) -> Stats {
        match self.stats.lock() {
            Ok(stats_guard) => stats_guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn command(&self, command: Command) -> Result<(), ConnectionError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    fn record(&self, update: impl FnOnce(&mut Stats)) {
        record(&self.stats, update);
    }
}

fn record(stats: &Mutex<Stats>, update: impl FnOnce(&mut Stats)) {
    if let Ok(mut stats_guard) = stats.lock() {
        update(&mut stats_guard);
    } else {
        tracing::error!("failed to update stats");
    }
}

struct Driver {
    config: Config,
    session: ConnectionSession,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: EventTx,
    stats: Arc<Mutex<Stats>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.publish();
            let keep_running = match self.session.state() {
                ConnectionState::Disconnected | ConnectionState::Failed => self.idle().await,
                ConnectionState::Connecting => self.dial().await,
                ConnectionState::Reconnecting { attempt, delay } => {
                    self.wait_to_reconnect(attempt, delay).await
                }
                ConnectionState::Connected => {
                    // only reachable if a socket exit was not applied
                    self.close(CloseKind::Unclean);
                    true
                }
            };
            if !keep_running {
                break;
            }
        }
        tracing::debug!("connection driver stopped");
    }

    fn publish(&self) {
        let state = self.session.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = %current, to = %state, "connection state transition");
            *current = state;
            true
        });
    }

    async fn idle(&mut self) -> bool {
        match self.cmd_rx.recv().await {
            Some(command) => {
                self.handle_offline(command);
                true
            }
            None => false,
        }
    }

    /// Handles a command while no socket is open.
    fn handle_offline(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let result = self.session.connect().map(|_| ());
                if let Err(e) = &result {
                    tracing::warn!("connect refused: {}", e);
                }
                // publish before replying so callers observe the new state
                self.publish();
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                self.session.disconnect();
                self.publish();
                let _ = reply.send(());
            }
            Command::Reset(reply) => {
                self.session.reset();
                self.publish();
                let _ = reply.send(());
            }
            Command::Send(message) => {
                tracing::trace!(kind = %message.kind(), "dropping outbound frame while not connected");
                record(&self.stats, Stats::record_dropped);
            }
        }
    }

    async fn dial(&mut self) -> bool {
        let request = match utils::build_request(&self.config) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("failed to build socket request: {}", e);
                self.close(CloseKind::Unclean);
                return true;
            }
        };

        tracing::info!(url = %self.config.url(), "connecting");
        let dial = tokio_tungstenite::connect_async(request);
        tokio::pin!(dial);

        // Keep serving the mailbox while the dial is in flight.
        let ws = loop {
            tokio::select! {
                result = &mut dial => match result {
                    Ok((ws, _)) => break ws,
                    Err(e) => {
                        tracing::warn!("failed to connect: {}", e);
                        self.close(CloseKind::Unclean);
                        return true;
                    }
                },
                command = self.cmd_rx.recv() => match command {
                    None => return false,
                    Some(command) => {
                        // A disconnect during the dial drops the pending socket
                        self.handle_offline(command);
                        if self.session.state() != ConnectionState::Connecting {
                            return true;
                        }
                    }
                }
            }
        };

        self.session.on_open();
        self.publish();
        tracing::info!("connected");

        match self.run_socket(ws).await {
            Exit::Closed(kind) => {
                self.close(kind);
                true
            }
            Exit::Disconnected => true,
            Exit::Shutdown => false,
        }
    }

    async fn run_socket(&mut self, ws: WsStream) -> Exit {
        let (mut write, mut read) = ws.split();

        // The handshake is always the first frame on a fresh socket.
        let handshake = Message::handshake(self.config.version(), self.config.model());
        if let Err(e) = write.send(WsMessage::Binary(encode(&handshake))).await {
            tracing::warn!("failed to send handshake: {}", e);
            return Exit::Closed(CloseKind::Unclean);
        }
        record(&self.stats, Stats::record_sent);
        tracing::debug!("handshake sent");

        loop {
            tokio::select! {
                // Handle incoming frames from the server
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Binary(bytes))) => self.dispatch_inbound(&bytes),
                    Some(Ok(WsMessage::Text(text))) => self.dispatch_inbound(text.as_bytes()),
                    Some(Ok(WsMessage::Close(reason))) => {
                        tracing::info!("connection closed: {:?}", reason);
                        let _ = write.close().await;
                        return Exit::Closed(CloseKind::Clean);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("failed to read message: {}", e);
                        return Exit::Closed(CloseKind::Unclean);
                    }
                    None => {
                        tracing::warn!("socket ended without a close frame");
                        return Exit::Closed(CloseKind::Unclean);
                    }
                },
                // Handle outgoing commands from the handle
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Send(message)) => {
                        let kind = message.kind();
                        if let Err(e) = write.send(WsMessage::Binary(encode(&message))).await {
                            tracing::warn!(%kind, "failed to send message: {}", e);
                            return Exit::Closed(CloseKind::Unclean);
                        }
                        record(&self.stats, Stats::record_sent);
                    }
                    // Already connected, nothing to do
                    Some(Command::Connect(reply)) => {
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Reset(reply)) => {
                        let _ = reply.send(());
                    }
                    Some(Command::Disconnect(reply)) => {
                        if let Err(e) = write.send(WsMessage::Close(None)).await {
                            tracing::debug!("failed to send close frame: {}", e);
                        }
                        self.session.disconnect();
                        self.publish();
                        let _ = reply.send(());
                        tracing::info!("disconnected");
                        return Exit::Disconnected;
                    }
                    // Every handle is gone
                    None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Exit::Shutdown;
                    }
                }
            }
        }
    }

    /// Decodes one frame and routes it. A bad frame never closes the socket.
    fn dispatch_inbound(&self, frame: &[u8]) {
        record(&self.stats, Stats::record_received);
        let message = match decode(frame) {
            Ok(message) => message,
            Err(e) => {
                record(&self.stats, Stats::record_decode_failure);
                tracing::warn!("failed to decode frame: {}", e);
                return;
            }
        };

        tracing::debug!(kind = %message.kind(), "received message");
        let inbound = Inbound::from(message);
        if let Inbound::ServerError(error) = &inbound {
            tracing::error!("server error: {}", error);
        }
        if self.events_tx.send(inbound).is_err() {
            tracing::trace!("no subscribers for inbound message");
        }
    }

    fn close(&mut self, kind: CloseKind) {
        match self.session.on_close(kind) {
            ConnectionState::Reconnecting { attempt, delay } => {
                record(&self.stats, Stats::record_reconnect);
                tracing::info!(
                    attempt = attempt + 1,
                    max = self.config.backoff().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
            }
            ConnectionState::Failed => {
                tracing::error!(
                    attempts = self.session.attempts(),
                    "failed to connect after multiple attempts"
                );
            }
            _ => {}
        }
    }

    async fn wait_to_reconnect(&mut self, attempt: u32, delay: Duration) -> bool {
        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                // Backoff elapsed, dial again
                _ = &mut timer => {
                    self.session.on_retry_timer();
                    tracing::debug!(attempt = attempt + 1, "reconnect timer fired");
                    return true;
                }
                command = self.cmd_rx.recv() => match command {
                    None => return false,
                    Some(command) => {
                        // Disconnect or reset cancels the pending retry
                        self.handle_offline(command);
                        if !matches!(self.session.state(), ConnectionState::Reconnecting { .. }) {
                            return true;
                        }
                    }
                }
            }
        }
    }
}

// Create a manager with a specific config and start connecting.
pub async fn connect_with_config(config: Config) -> Result<ConnectionManager, ConnectionError> {
    let manager = ConnectionManager::new(config);
    manager.connect().await?;
    Ok(manager)
}

// Connect with default settings.
pub async fn connect() -> Result<ConnectionManager, ConnectionError> {
    connect_with_config(Config::new()).await
}
