#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use strum_macros::Display;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::circuit_breaker::{BreakerState, CircuitBreaker};
use super::config::Config;
use super::endpoint::Endpoint;
use super::error::WsError;
use super::health::probe_for;
use super::keepalive::KeepaliveMonitor;
use super::listeners::{ListenerHandle, ListenerSet};
use super::queue::{EnqueueOutcome, MessageQueue};
use super::reconnect::ReconnectPolicy;
use super::task::ScheduledTask;
use super::traits::{FrameHandler, HealthProbe, SystemFrame};
use crate::protocol::{ClientFrame, parse_frame};
use crate::{Result, error::Error};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type StateListener = dyn Fn(ConnectionState) + Send + Sync;

/// Upper bound on the close handshake during `disconnect()`.
const CLOSE_TIMEOUT_DURATION: Duration = Duration::from_secs(1);

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and not trying to
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting for the next reconnection attempt
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
    },
    /// Reconnection gave up; only a health check or an explicit `connect()` revives it
    Disabled,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Coarse status for a connection indicator.
    #[must_use]
    pub const fn status(self) -> ConnectionStatus {
        match self {
            Self::Connected { .. } => ConnectionStatus::Connected,
            Self::Connecting | Self::Reconnecting { .. } => ConnectionStatus::Connecting,
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Disabled => ConnectionStatus::Error,
        }
    }
}

/// What a connection indicator shows.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

/// Snapshot of the connection internals, taken on the connection task.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub state: ConnectionState,
    /// Attempt number of the current reconnection cycle, `0` when connected
    pub reconnect_attempt: u32,
    pub breaker: BreakerState,
    pub consecutive_failures: u32,
    /// Outbound messages waiting for the socket
    pub queued: usize,
    /// Armed timers and in-flight background work: the connect attempt, the reconnect and
    /// health-check timers, a running health probe, and the keepalive ping and pong timeout
    pub pending_timers: usize,
    /// Number of sockets opened so far
    pub epoch: u64,
    /// Channels subscribed on the current socket
    pub subscribed_channels: usize,
}

pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        payload: String,
        channel: Option<String>,
    },
    Control(ClientFrame),
    Established {
        attempt_id: u64,
        result: Result<Box<WsStream>>,
    },
    ReconnectDue {
        ticket: u64,
    },
    PingDue {
        epoch: u64,
    },
    PongTimeout {
        epoch: u64,
    },
    HealthCheckDue,
    HealthCheckResult {
        healthy: bool,
    },
    Inspect(oneshot::Sender<Diagnostics>),
}

/// Handle to the connection task.
///
/// The task owns the socket and every timer; this handle only sends it commands, so it is
/// cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    state_listeners: Arc<ListenerSet<StateListener>>,
    cancel: CancellationToken,
}

/// The connection task before it is started.
pub(crate) struct ConnectionDriver {
    endpoint: Endpoint,
    config: Config,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    state_listeners: Arc<ListenerSet<StateListener>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a connection manager and the task that will drive it.
    ///
    /// Nothing connects until [`ConnectionManager::connect`] is called.
    pub(crate) fn new(endpoint: Endpoint, config: Config) -> Result<(Self, ConnectionDriver)> {
        validate(&endpoint, &config)?;
        let health_probe = probe_for(config.health_check.as_ref(), &endpoint)?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let state_listeners = Arc::new(ListenerSet::new());
        let cancel = CancellationToken::new();

        let manager = Self {
            commands: commands_tx.clone(),
            state_rx,
            state_listeners: Arc::clone(&state_listeners),
            cancel: cancel.clone(),
        };
        let driver = ConnectionDriver {
            endpoint,
            config,
            commands_tx,
            commands_rx,
            state_tx,
            state_listeners,
            health_probe,
            cancel,
        };

        Ok((manager, driver))
    }

    /// Open the socket. Resolves once it is open.
    ///
    /// A no-op while already connected; joins the pending attempt while connecting.
    pub async fn connect(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command(Command::Connect { reply })?;
        response.await.map_err(|_e| WsError::ConnectionClosed)?
    }

    /// Close the socket with a normal-closure code and stop reconnecting.
    ///
    /// Afterwards no timer is armed and nothing is queued.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command(Command::Disconnect { reply })?;
        response.await.map_err(|_e| WsError::ConnectionClosed)?
    }

    /// Send a text frame now, or queue it until the socket is open.
    pub fn send(&self, payload: String, channel: Option<String>) -> Result<()> {
        self.command(Command::Send { payload, channel })
    }

    /// Send a subscribe/unsubscribe/catchup frame if the socket is open.
    ///
    /// Control frames are not queued: subscriptions are replayed whenever a socket opens.
    pub(crate) fn send_control(&self, frame: ClientFrame) {
        if let Err(e) = self.command(Command::Control(frame)) {
            #[cfg(feature = "tracing")]
            tracing::trace!(error = %e, "Dropping control frame, connection task is gone");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Call `listener` on every state transition, in transition order.
    pub fn on_state_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.state_listeners.insert(Arc::new(listener))
    }

    /// Snapshot of the connection internals.
    pub async fn diagnostics(&self) -> Result<Diagnostics> {
        let (reply, response) = oneshot::channel();
        self.command(Command::Inspect(reply))?;
        Ok(response.await.map_err(|_e| WsError::ConnectionClosed)?)
    }

    /// Guard that stops the connection task when dropped.
    pub(crate) fn shutdown_guard(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    /// Stop the connection task. Every later command fails.
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// A manager whose commands land in the returned receiver instead of a socket.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let manager = Self {
            commands,
            state_rx,
            state_listeners: Arc::new(ListenerSet::new()),
            cancel: CancellationToken::new(),
        };
        (manager, commands_rx)
    }
}

fn validate(endpoint: &Endpoint, config: &Config) -> Result<()> {
    endpoint.resolve()?;

    if config.keepalive.ping_interval.is_zero() || config.keepalive.pong_timeout.is_zero() {
        return Err(Error::validation("keepalive intervals must be non-zero"));
    }
    if config
        .health_check
        .as_ref()
        .is_some_and(|health| health.interval.is_zero())
    {
        return Err(Error::validation("health check interval must be non-zero"));
    }

    Ok(())
}

impl ConnectionDriver {
    /// Use `probe` instead of the probe derived from the health-check configuration.
    pub(crate) fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    /// Start the connection task, dispatching inbound frames to `handler`.
    pub(crate) fn spawn(self, handler: Arc<dyn FrameHandler>) -> JoinHandle<()> {
        let Self {
            endpoint,
            config,
            commands_tx,
            commands_rx,
            state_tx,
            state_listeners,
            health_probe,
            cancel,
        } = self;

        let driver = Driver {
            breaker: CircuitBreaker::new(config.circuit_breaker),
            policy: ReconnectPolicy::new(config.reconnect),
            queue: MessageQueue::new(config.queue.clone()),
            keepalive: KeepaliveMonitor::new(config.keepalive),
            reconnect_timer: ScheduledTask::new(),
            health_timer: ScheduledTask::new(),
            health_task: ScheduledTask::new(),
            attempt_task: ScheduledTask::new(),
            sink: None,
            source: None,
            epoch: 0,
            attempt_id: 0,
            ticket: 0,
            waiters: Vec::new(),
            manual_disconnect: false,
            subscribed: HashSet::new(),
            endpoint,
            config,
            handler,
            commands: commands_tx,
            commands_rx,
            state_tx,
            state_listeners,
            health_probe,
            cancel,
        };

        tokio::spawn(driver.run())
    }
}

struct Driver {
    endpoint: Endpoint,
    config: Config,
    handler: Arc<dyn FrameHandler>,
    commands: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    state_listeners: Arc<ListenerSet<StateListener>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    cancel: CancellationToken,

    breaker: CircuitBreaker,
    policy: ReconnectPolicy,
    queue: MessageQueue,
    keepalive: KeepaliveMonitor,
    reconnect_timer: ScheduledTask,
    health_timer: ScheduledTask,
    health_task: ScheduledTask,
    attempt_task: ScheduledTask,

    sink: Option<WsSink>,
    source: Option<WsSource>,
    /// Bumped every time a socket opens
    epoch: u64,
    /// Identifies the in-flight connection attempt; results of older attempts are ignored
    attempt_id: u64,
    /// Identifies the armed reconnect timer
    ticket: u64,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    manual_disconnect: bool,
    /// Channels subscribed on the current socket
    subscribed: HashSet<String>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                message = next_message(&mut self.source) => self.handle_message(message).await,
            }
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.connect(reply),
            Command::Disconnect { reply } => {
                self.disconnect().await;
                _ = reply.send(Ok(()));
            }
            Command::Send { payload, channel } => self.send(payload, channel).await,
            Command::Control(frame) => self.send_control(frame).await,
            Command::Established { attempt_id, result } => {
                if attempt_id != self.attempt_id || self.manual_disconnect {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(attempt_id, "Ignoring result of superseded connection attempt");
                    return;
                }
                match result {
                    Ok(stream) => self.on_open(*stream).await,
                    Err(e) => self.on_attempt_failed(&e),
                }
            }
            Command::ReconnectDue { ticket } => {
                let waiting = matches!(self.state(), ConnectionState::Reconnecting { .. });
                if ticket == self.ticket && waiting && !self.manual_disconnect {
                    self.start_attempt();
                }
            }
            Command::PingDue { epoch } => {
                if epoch == self.epoch && self.sink.is_some() {
                    self.send_ping().await;
                }
            }
            Command::PongTimeout { epoch } => {
                if epoch == self.epoch && self.sink.is_some() && self.keepalive.is_awaiting_pong()
                {
                    let timeout = self.keepalive.config().pong_timeout;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(?timeout, epoch, "Heartbeat timeout, closing stale connection");
                    self.on_link_lost(&WsError::StaleConnection { timeout }.into());
                }
            }
            Command::HealthCheckDue => self.run_health_check(),
            Command::HealthCheckResult { healthy } => self.on_health_result(healthy),
            Command::Inspect(reply) => {
                _ = reply.send(self.diagnostics());
            }
        }
    }

    async fn handle_message(
        &mut self,
        message: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        match message {
            Some(Ok(Message::Text(text))) => self.handle_text(text.as_bytes()).await,
            Some(Ok(Message::Binary(bytes))) => self.handle_text(&bytes).await,
            Some(Ok(Message::Close(frame))) => {
                if frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal) {
                    #[cfg(feature = "tracing")]
                    tracing::info!(epoch = self.epoch, "Server closed the connection normally");
                    self.drop_socket();
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    self.on_link_lost(&WsError::ConnectionClosed.into());
                }
            }
            Some(Ok(_)) => {
                // Protocol-level ping/pong frames are answered by tungstenite.
            }
            Some(Err(e)) => self.on_link_lost(&e.into()),
            None => self.on_link_lost(&WsError::ConnectionClosed.into()),
        }
    }

    async fn handle_text(&mut self, bytes: &[u8]) {
        #[cfg(feature = "tracing")]
        tracing::trace!(text = %String::from_utf8_lossy(bytes), "Received WebSocket message");

        let frame = match parse_frame(bytes) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    text = %String::from_utf8_lossy(bytes),
                    error = %e,
                    "Failed to parse WebSocket message"
                );
                self.handler.on_error(&e);
                return;
            }
        };

        for system in self.handler.on_frame(frame) {
            match system {
                SystemFrame::Ping => self.write_frame(&ClientFrame::Pong).await,
                SystemFrame::Pong => {
                    self.keepalive.pong_received();
                }
            }
        }
    }

    fn connect(&mut self, reply: oneshot::Sender<Result<()>>) {
        self.manual_disconnect = false;

        match self.state() {
            ConnectionState::Connected { .. } => {
                _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting => self.waiters.push(reply),
            ConnectionState::Reconnecting { .. } => {
                self.waiters.push(reply);
                self.reconnect_timer.cancel();
                self.start_attempt();
            }
            ConnectionState::Disabled => {
                self.waiters.push(reply);
                self.health_timer.cancel();
                self.health_task.cancel();
                self.policy.reset();
                self.start_attempt();
            }
            ConnectionState::Disconnected => {
                self.waiters.push(reply);
                self.policy.reset();
                self.start_attempt();
            }
        }
    }

    fn start_attempt(&mut self) {
        if !self.breaker.can_attempt_connection() {
            let retry_after = self.breaker.retry_after();
            #[cfg(feature = "tracing")]
            tracing::debug!(?retry_after, "Circuit breaker open, postponing connection attempt");
            self.fail_waiters(|| WsError::CircuitOpen { retry_after });
            self.arm_reconnect(retry_after);
            return;
        }

        let url = match self.endpoint.resolve() {
            Ok(url) => url,
            Err(e) => {
                self.breaker.record_attempt();
                self.on_attempt_failed(&e);
                return;
            }
        };

        self.breaker.record_attempt();
        self.attempt_id = self.attempt_id.wrapping_add(1);
        self.set_state(ConnectionState::Connecting);

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, attempt = self.policy.attempt(), "Connecting");

        let attempt_id = self.attempt_id;
        let connect_timeout = self.config.connect_timeout;
        let commands = self.commands.clone();
        self.attempt_task.spawn(async move {
            let result = match timeout(connect_timeout, connect_async(String::from(url))).await {
                Ok(Ok((stream, _))) => Ok(Box::new(stream)),
                Ok(Err(e)) => Err(Error::from(e)),
                Err(_elapsed) => Err(WsError::Timeout.into()),
            };
            _ = commands.send(Command::Established { attempt_id, result });
        });
    }

    async fn on_open(&mut self, stream: WsStream) {
        let (sink, source) = stream.split();
        self.sink = Some(sink);
        self.source = Some(source);
        self.epoch = self.epoch.wrapping_add(1);
        self.subscribed.clear();

        self.breaker.on_connection_success();
        self.policy.reset();
        self.reconnect_timer.cancel();
        self.health_timer.cancel();
        self.health_task.cancel();
        self.set_state(ConnectionState::Connected {
            since: Instant::now(),
        });

        #[cfg(feature = "tracing")]
        tracing::info!(epoch = self.epoch, "WebSocket connected");

        self.start_keepalive().await;

        for frame in self.handler.on_open() {
            self.send_control(frame).await;
        }

        self.flush_queue().await;

        if self.sink.is_some() {
            for waiter in self.waiters.drain(..) {
                _ = waiter.send(Ok(()));
            }
        }
    }

    fn on_attempt_failed(&mut self, error: &Error) {
        self.breaker.on_connection_failure();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            error = %error,
            attempt = self.policy.attempt(),
            failures = self.breaker.consecutive_failures(),
            "Unable to connect"
        );

        let reason = error.to_string();
        self.fail_waiters(|| WsError::ConnectFailed {
            reason: reason.clone(),
        });
        self.schedule_reconnect();
    }

    /// The socket went away without a normal close.
    fn on_link_lost(&mut self, error: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %error, epoch = self.epoch, "Connection lost");
        #[cfg(not(feature = "tracing"))]
        let _ = error;

        self.drop_socket();

        if self.manual_disconnect {
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.schedule_reconnect();
        }
    }

    fn drop_socket(&mut self) {
        self.keepalive.stop();
        self.sink = None;
        self.source = None;
        self.subscribed.clear();
    }

    fn schedule_reconnect(&mut self) {
        match self.policy.next_backoff() {
            Some(delay) => self.arm_reconnect(delay.max(self.breaker.retry_after())),
            None => self.disable(),
        }
    }

    fn arm_reconnect(&mut self, delay: Duration) {
        self.ticket = self.ticket.wrapping_add(1);
        let ticket = self.ticket;
        let commands = self.commands.clone();
        self.reconnect_timer.schedule(delay, async move {
            _ = commands.send(Command::ReconnectDue { ticket });
        });

        let attempt = self.policy.attempt();
        self.set_state(ConnectionState::Reconnecting { attempt });

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, ?delay, "Reconnect scheduled");
    }

    fn disable(&mut self) {
        let attempts = self.policy.attempt();
        self.reconnect_timer.cancel();
        self.set_state(ConnectionState::Disabled);

        #[cfg(feature = "tracing")]
        tracing::error!(attempts, "Reconnection attempts exhausted, connection disabled");

        self.fail_waiters(|| WsError::ReconnectExhausted { attempts });
        self.handler
            .on_error(&WsError::ReconnectExhausted { attempts }.into());

        if let Some(health) = &self.config.health_check {
            let commands = self.commands.clone();
            self.health_timer.repeat(health.interval, move || {
                commands.send(Command::HealthCheckDue).is_ok()
            });
        }
    }

    fn run_health_check(&mut self) {
        if self.state() != ConnectionState::Disabled {
            self.health_timer.cancel();
            return;
        }
        if self.health_task.is_pending() {
            return;
        }

        match &self.health_probe {
            Some(probe) => {
                let probe = Arc::clone(probe);
                let commands = self.commands.clone();
                self.health_task.spawn(async move {
                    let healthy = probe.is_healthy().await;
                    _ = commands.send(Command::HealthCheckResult { healthy });
                });
            }
            None => self.on_health_result(true),
        }
    }

    fn on_health_result(&mut self, healthy: bool) {
        if self.state() != ConnectionState::Disabled {
            return;
        }

        if !healthy {
            #[cfg(feature = "tracing")]
            tracing::debug!("Health check failed, connection stays disabled");
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Health check passed, re-enabling connection");

        self.health_timer.cancel();
        self.breaker.reset();
        self.policy.reset();
        self.start_attempt();
    }

    async fn disconnect(&mut self) {
        self.manual_disconnect = true;
        self.attempt_id = self.attempt_id.wrapping_add(1);

        if self.state() == ConnectionState::Connecting {
            self.breaker.cancel_attempt();
        }
        self.attempt_task.cancel();
        self.reconnect_timer.cancel();
        self.health_timer.cancel();
        self.health_task.cancel();
        self.keepalive.stop();
        self.policy.reset();

        if let Some(mut sink) = self.sink.take() {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            }));
            match timeout(CLOSE_TIMEOUT_DURATION, sink.send(close)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %e, "Close frame could not be sent");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
                Err(_elapsed) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Close handshake timed out");
                }
            }
        }
        self.drop_socket();

        let dropped = self.queue.clear();
        #[cfg(feature = "tracing")]
        tracing::info!(dropped, "WebSocket disconnected by client");
        #[cfg(not(feature = "tracing"))]
        let _ = dropped;

        self.fail_waiters(|| WsError::Disconnected);
        self.set_state(ConnectionState::Disconnected);
    }

    async fn shutdown(&mut self) {
        if self.sink.is_some() || self.state() != ConnectionState::Disconnected {
            self.disconnect().await;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection task stopped");
    }

    async fn send(&mut self, payload: String, channel: Option<String>) {
        if self.sink.is_some() && self.queue.is_empty() {
            if let Err(e) = self.write(payload.clone()).await {
                self.enqueue(payload, channel);
                self.on_link_lost(&e);
            }
            return;
        }

        self.enqueue(payload, channel);
        if self.sink.is_some() {
            self.flush_queue().await;
        }
    }

    fn enqueue(&mut self, payload: String, channel: Option<String>) {
        match self.queue.enqueue(payload, channel) {
            EnqueueOutcome::Queued => {
                #[cfg(feature = "tracing")]
                tracing::trace!(queued = self.queue.len(), "Message queued until connected");
            }
            EnqueueOutcome::Evicted(evicted) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(channel = ?evicted.channel, "Queue full, evicted oldest message");
                #[cfg(not(feature = "tracing"))]
                let _ = &evicted;
            }
            EnqueueOutcome::Rejected(rejected) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(channel = ?rejected.channel, "Queue saturated, message dropped");
                #[cfg(not(feature = "tracing"))]
                let _ = &rejected;
            }
        }
    }

    async fn flush_queue(&mut self) {
        let mut pending = self.queue.drain().into_iter();

        while let Some(message) = pending.next() {
            if let Err(e) = self.write(message.payload.clone()).await {
                self.queue.requeue(std::iter::once(message).chain(pending));
                self.on_link_lost(&e);
                return;
            }
        }
    }

    async fn send_control(&mut self, frame: ClientFrame) {
        if self.sink.is_none() {
            #[cfg(feature = "tracing")]
            tracing::trace!(?frame, "Not connected, control frame will be replayed on open");
            return;
        }

        let duplicate = match &frame {
            ClientFrame::Subscribe { channel } => !self.subscribed.insert(channel.clone()),
            ClientFrame::Unsubscribe { channel } => !self.subscribed.remove(channel),
            _ => false,
        };
        if duplicate {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                channel = frame.channel(),
                epoch = self.epoch,
                "Channel already in this state on the current socket, skipping"
            );
            return;
        }

        self.write_frame(&frame).await;
    }

    async fn start_keepalive(&mut self) {
        let epoch = self.epoch;
        let commands = self.commands.clone();
        self.keepalive
            .start(move || commands.send(Command::PingDue { epoch }).is_ok());

        self.send_ping().await;
    }

    async fn send_ping(&mut self) {
        self.write_frame(&ClientFrame::Ping).await;
        if self.sink.is_none() {
            return;
        }

        let epoch = self.epoch;
        let commands = self.commands.clone();
        self.keepalive.ping_sent(async move {
            _ = commands.send(Command::PongTimeout { epoch });
        });
    }

    /// Serialize and write `frame`; a failed write is treated as a lost link.
    async fn write_frame(&mut self, frame: &ClientFrame) {
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Unable to serialize control frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(%json, "Sending control frame");

        if let Err(e) = self.write(json).await {
            self.on_link_lost(&e);
        }
    }

    async fn write(&mut self, text: String) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(WsError::ConnectionClosed.into());
        };
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    fn fail_waiters<F>(&mut self, error: F)
    where
        F: Fn() -> WsError,
    {
        for waiter in self.waiters.drain(..) {
            _ = waiter.send(Err(error().into()));
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if !changed {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(?state, "Connection state changed");

        for listener in self.state_listeners.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!(?state, "Connection state listener panicked");
            }
        }
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            state: self.state(),
            reconnect_attempt: self.policy.attempt(),
            breaker: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            queued: self.queue.len(),
            pending_timers: usize::from(self.attempt_task.is_pending())
                + usize::from(self.reconnect_timer.is_pending())
                + usize::from(self.health_timer.is_pending())
                + usize::from(self.health_task.is_pending())
                + self.keepalive.pending_timers(),
            epoch: self.epoch,
            subscribed_channels: self.subscribed.len(),
        }
    }
}

async fn next_message(
    source: &mut Option<WsSource>,
) -> Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match source {
        Some(source) => source.next().await,
        None => std::future::pending().await,
    }
}
