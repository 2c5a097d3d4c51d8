//! Seams between the connection task and the layers above it.

use async_trait::async_trait;

use crate::error::Error;
use crate::protocol::{ClientFrame, ServerFrame};

/// System frames the connection must act on after routing.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemFrame {
    /// The server pinged us; answer with a pong
    Ping,
    /// The server answered our ping; clear the keepalive timeout
    Pong,
}

/// Consumer of everything that happens on the socket.
///
/// The connection task calls these methods from its own task, one at a time and in the
/// order events occur, so implementations see frames in transport order.
pub trait FrameHandler: Send + Sync + 'static {
    /// Frames to send as soon as the socket opens, before any queued message.
    ///
    /// This is where subscriptions are replayed after a reconnect.
    fn on_open(&self) -> Vec<ClientFrame>;

    /// Dispatch one inbound frame. Returns the system frames found inside it.
    fn on_frame(&self, frame: ServerFrame) -> Vec<SystemFrame>;

    /// Report a failure that is not tied to a frame, e.g. exhausted reconnection.
    fn on_error(&self, error: &Error) {
        let _ = error;
    }
}

/// External health check used to revive a disabled connection.
///
/// # Example
///
/// ```ignore
/// struct AlwaysUp;
///
/// #[async_trait]
/// impl HealthProbe for AlwaysUp {
///     async fn is_healthy(&self) -> bool {
///         true
///     }
/// }
/// ```
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Whether the server looks ready to accept a new socket.
    async fn is_healthy(&self) -> bool;
}
