use serde::Serialize;

/// Frame sent from the client to the server.
///
/// # Example
///
/// ```
/// use dashboard_realtime::protocol::ClientFrame;
///
/// let frame = ClientFrame::catchup("session:42", 7);
/// assert_eq!(
///     serde_json::to_string(&frame).unwrap(),
///     r#"{"action":"catchup","channel":"session:42","last_event_id":7}"#
/// );
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving events for a channel
    Subscribe { channel: String },
    /// Stop receiving events for a channel
    Unsubscribe { channel: String },
    /// Ask the server to replay every event on `channel` with an id above `last_event_id`
    Catchup { channel: String, last_event_id: u64 },
    /// Keepalive probe; the server answers with `{"type":"pong"}`
    Ping,
    /// Answer to a server-initiated `{"type":"ping"}`
    Pong,
}

impl ClientFrame {
    /// Create a subscribe frame.
    #[must_use]
    pub fn subscribe<S: Into<String>>(channel: S) -> Self {
        Self::Subscribe {
            channel: channel.into(),
        }
    }

    /// Create an unsubscribe frame.
    #[must_use]
    pub fn unsubscribe<S: Into<String>>(channel: S) -> Self {
        Self::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Create a catchup frame.
    #[must_use]
    pub fn catchup<S: Into<String>>(channel: S, last_event_id: u64) -> Self {
        Self::Catchup {
            channel: channel.into(),
            last_event_id,
        }
    }

    /// The channel this frame targets, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Subscribe { channel }
            | Self::Unsubscribe { channel }
            | Self::Catchup { channel, .. } => Some(channel),
            Self::Ping | Self::Pong => None,
        }
    }

    /// Serialize the frame to its JSON text representation.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
