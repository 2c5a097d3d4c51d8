use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::DropGuard;

use super::registry::{ChannelRegistry, Subscription};
use super::router::Router;
use crate::Result;
use crate::error::Error;
use crate::protocol::{Event, EventKind};
use crate::ws::config::Config;
use crate::ws::connection::{ConnectionState, ConnectionStatus, Diagnostics};
use crate::ws::endpoint::Endpoint;
use crate::ws::{ConnectionManager, FrameHandler, HealthProbe, ListenerHandle};

/// Realtime client for the investigation dashboard.
///
/// One client owns one WebSocket, shared by every channel subscription. Clones share the
/// same socket; dropping the last clone stops the connection task.
///
/// # Examples
///
/// ```rust, no_run
/// use dashboard_realtime::{Client, Config, Endpoint};
/// use dashboard_realtime::types::session_channel;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new(Endpoint::new("https://dash.example.com", "/api/v1/ws"), Config::default())?;
///
///     let _subscription = client.subscribe(&session_channel("42"), |event| {
///         println!("{}: {:?}", event.kind, event.payload);
///     })?;
///     let _status = client.on_connection_change(|state| println!("{:?}", state.status()));
///
///     client.connect().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Handle to the connection task
    connection: ConnectionManager,
    /// Frame dispatch and channel bookkeeping
    router: Arc<Router>,
    /// Stops the connection task when the last clone goes away
    _shutdown: DropGuard,
}

impl Client {
    /// Create a client and start its connection task. Does not connect yet.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(endpoint: Endpoint, config: Config) -> Result<Self> {
        Self::build(endpoint, config, None)
    }

    /// Like [`Client::new`], with a custom probe deciding when a disabled connection
    /// may retry.
    pub fn with_health_probe(
        endpoint: Endpoint,
        config: Config,
        probe: Arc<dyn HealthProbe>,
    ) -> Result<Self> {
        Self::build(endpoint, config, Some(probe))
    }

    fn build(
        endpoint: Endpoint,
        config: Config,
        probe: Option<Arc<dyn HealthProbe>>,
    ) -> Result<Self> {
        let (connection, driver) = ConnectionManager::new(endpoint, config)?;
        let driver = match probe {
            Some(probe) => driver.with_health_probe(probe),
            None => driver,
        };

        let registry = Arc::new(ChannelRegistry::new(connection.clone()));
        let router = Arc::new(Router::new(registry));
        let handler: Arc<dyn FrameHandler> = Arc::clone(&router) as Arc<dyn FrameHandler>;
        drop(driver.spawn(handler));

        Ok(Self {
            inner: Arc::new(ClientInner {
                _shutdown: connection.shutdown_guard(),
                connection,
                router,
            }),
        })
    }

    /// Open the socket, resolving once it is open.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await
    }

    /// Close the socket and stop reconnecting until [`Client::connect`] is called again.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.connection.disconnect().await
    }

    /// Disconnect and stop the connection task, even if other clones exist.
    pub async fn destroy(self) -> Result<()> {
        let result = self.inner.connection.disconnect().await;
        self.inner.connection.shutdown();
        result
    }

    /// Register `handler` for events on `channel`.
    ///
    /// The first handler on a channel subscribes to it on the server; dropping the
    /// returned [`Subscription`] removes the handler again.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.router.registry().subscribe(channel, handler)
    }

    /// Events on `channel` as a stream. Dropping the stream unsubscribes.
    pub fn subscribe_stream(&self, channel: &str) -> Result<impl Stream<Item = Event> + use<>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(channel, move |event| {
            _ = tx.send(event.clone());
        })?;

        Ok(stream! {
            let _subscription = subscription;
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    /// Register `listener` for every event of type `kind`, on any channel.
    pub fn on_event<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.router.on_event(kind, listener)
    }

    /// Register `listener` for connection state transitions.
    pub fn on_connection_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner.connection.on_state_change(listener)
    }

    /// Register `listener` for errors: malformed frames, panicking handlers, exhaustion.
    pub fn on_error<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.router.on_error(listener)
    }

    /// Send an application message, queueing it while the socket is down.
    ///
    /// Messages for priority channels survive queue overflow longer than the rest.
    pub fn send<T: Serialize>(&self, channel: Option<&str>, message: &T) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.inner
            .connection
            .send(payload, channel.map(str::to_owned))
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.connection_state().status()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Highest event id delivered on `channel`.
    #[must_use]
    pub fn last_event_id(&self, channel: &str) -> Option<u64> {
        self.inner.router.registry().last_event_id(channel)
    }

    /// Number of channels with at least one handler.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.router.registry().channel_count()
    }

    /// Snapshot of the connection internals.
    pub async fn diagnostics(&self) -> Result<Diagnostics> {
        self.inner.connection.diagnostics().await
    }
}
