#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::protocol::response::EventKind;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error parsing a WebSocket message
    MessageParse(serde_json::Error),
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Operation timed out
    Timeout,
    /// Received an invalid or unexpected message
    InvalidMessage(String),
    /// The circuit breaker is open and refuses new connection attempts
    CircuitOpen {
        /// Time until a half-open probe is allowed
        retry_after: Duration,
    },
    /// Reconnection gave up; the connection is disabled until revived
    ReconnectExhausted {
        /// Number of consecutive failed attempts
        attempts: u32,
    },
    /// A connection attempt failed before the socket opened
    ConnectFailed {
        /// Human-readable failure cause
        reason: String,
    },
    /// No PONG arrived in time and the link was force-closed
    StaleConnection {
        /// The pong timeout that elapsed
        timeout: Duration,
    },
    /// The operation was abandoned because `disconnect()` was called
    Disconnected,
    /// A subscriber callback panicked while handling an event
    HandlerPanicked {
        /// Type of the event being handled
        kind: EventKind,
        /// Channel the handler was registered on, `None` for global listeners
        channel: Option<String>,
    },
}

impl WsError {
    /// Whether this error comes from a malformed inbound frame.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::MessageParse(_) | Self::InvalidMessage(_))
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::InvalidMessage(msg) => write!(f, "Invalid WebSocket message: {msg}"),
            Self::CircuitOpen { retry_after } => {
                write!(f, "Circuit breaker open, retry in {retry_after:?}")
            }
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Reconnection gave up after {attempts} attempts")
            }
            Self::ConnectFailed { reason } => write!(f, "Connection attempt failed: {reason}"),
            Self::StaleConnection { timeout } => {
                write!(f, "No PONG received within {timeout:?}, connection is stale")
            }
            Self::Disconnected => write!(f, "Disconnected by the client"),
            Self::HandlerPanicked {
                kind,
                channel: Some(channel),
            } => write!(f, "Handler for {kind} on {channel} panicked"),
            Self::HandlerPanicked {
                kind,
                channel: None,
            } => write!(f, "Listener for {kind} panicked"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = if e.is_protocol() {
            crate::error::Kind::Protocol
        } else {
            crate::error::Kind::WebSocket
        };
        crate::error::Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
