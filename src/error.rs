use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use strum_macros::Display;

/// Broad category of an [`Error`].
///
/// Transport failures are normally absorbed by reconnection; they only reach callers through
/// `connect()` or the error listeners.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Kind {
    /// Rejected input or configuration: empty channel names, unusable endpoints, zero intervals
    Validation,
    /// A dependency failed in a way the caller cannot fix, e.g. serializing an outbound message
    Internal,
    /// Connect, close, keepalive and reconnection failures
    #[strum(serialize = "websocket")]
    WebSocket,
    /// A frame received from the server could not be understood
    Protocol,
}

/// Error returned by every fallible operation in this crate.
///
/// Carries a [`Kind`] for coarse handling and the underlying cause for inspection through
/// [`Error::downcast_ref`], e.g. `error.downcast_ref::<WsError>()` for transport details.
///
/// [`WsError`]: crate::ws::WsError
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            cause: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    /// Shorthand for a [`Kind::Validation`] error with a human-readable reason.
    pub fn validation<S: Into<String>>(reason: S) -> Self {
        Self::with_source(
            Kind::Validation,
            Validation {
                reason: reason.into(),
            },
        )
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The wrapped cause, if any.
    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// The wrapped cause as a concrete type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner()?.downcast_ref::<E>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner() {
            Some(cause) => write!(f, "{} error: {cause}", self.kind),
            None => write!(f, "{} error", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let cause = self.cause.as_deref()?;
        Some(cause as &(dyn StdError + 'static))
    }
}

/// Why input was rejected.
#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl StdError for Validation {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

/// Serialization of outbound messages. Inbound parse failures go through
/// [`WsError::MessageParse`](crate::ws::WsError::MessageParse) instead.
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}
