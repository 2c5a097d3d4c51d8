use std::borrow::Cow;
use std::fmt;

use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use crate::serde_helpers::{StringFromAny, deserialize_logged};
use crate::types::session_channel;
use crate::ws::WsError;

/// `type` of a frame that wraps several frames in its `messages` array.
pub const BATCH_TYPE: &str = "message_batch";

/// Known application event types.
///
/// Anything the server sends that is not listed here is kept as [`EventKind::Unknown`]
/// so that newer servers do not break older dashboards.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Session list or session status changed
    SessionUpdate,
    /// Session reached a terminal state
    SessionCompleted,
    /// Stage timeline entry started, progressed or finished
    StageUpdate,
    /// A chat message was appended to a transcript
    ChatMessage,
    /// The assistant finished its turn in a chat
    ChatTurnCompleted,
    /// A tool call was issued or returned
    ToolCall,
    /// Partial model output
    LlmStreamChunk,
    /// Aggregated dashboard counters
    DashboardUpdate,
    /// Server refused or truncated a catchup request
    CatchupOverflow,
    /// Unknown event type from the server (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

impl EventKind {
    /// The wire name of this event type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionUpdate => "session_update",
            Self::SessionCompleted => "session_completed",
            Self::StageUpdate => "stage_update",
            Self::ChatMessage => "chat_message",
            Self::ChatTurnCompleted => "chat_turn_completed",
            Self::ToolCall => "tool_call",
            Self::LlmStreamChunk => "llm_stream_chunk",
            Self::DashboardUpdate => "dashboard_update",
            Self::CatchupOverflow => "catchup_overflow",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application event envelope.
///
/// Only the routing fields are typed; everything else the server sends ends up in
/// [`Event::payload`].
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct Event {
    /// Event type
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Explicit destination channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Session the event belongs to, used when `channel` is absent
    #[serde_as(as = "Option<StringFromAny>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Per-channel sequence number, monotonically increasing on the server
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Remaining fields of the frame
    #[serde(flatten)]
    #[builder(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Channel this event should be delivered to.
    ///
    /// An explicit `channel` wins; otherwise a `session_id` maps to `session:<id>`.
    #[must_use]
    pub fn route_channel(&self) -> Option<Cow<'_, str>> {
        if let Some(channel) = self.channel.as_deref().filter(|c| !c.is_empty()) {
            return Some(Cow::Borrowed(channel));
        }

        self.session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| Cow::Owned(session_channel(id)))
    }

    /// Look up a payload field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Deserialize the payload into a caller-defined type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }
}

/// Normalized inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Server keepalive probe; must be answered with a pong
    Ping,
    /// Answer to a client ping
    Pong,
    /// Several frames delivered together, in order
    Batch(Vec<ServerFrame>),
    /// Application event
    Event(Event),
}

enum Shape {
    Ping,
    Pong,
    Batch,
    Event,
    Untyped,
}

/// Parse one WebSocket text message.
///
/// Returns `Ok(None)` for empty or whitespace-only input. A top-level JSON array is
/// treated like a batch. Malformed entries inside a batch are logged and skipped so that
/// one bad entry does not drop its neighbours.
pub fn parse_frame(bytes: &[u8]) -> crate::Result<Option<ServerFrame>> {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_slice(trimmed).map_err(WsError::MessageParse)?;
    frame_from_value(value).map(Some)
}

fn frame_from_value(value: Value) -> crate::Result<ServerFrame> {
    let mut object = match value {
        Value::Array(items) => return Ok(ServerFrame::Batch(batch_from_values(items))),
        Value::Object(object) => object,
        other => {
            return Err(WsError::InvalidMessage(format!("expected a JSON object, got {other}")).into());
        }
    };

    let shape = match object.get("type").and_then(Value::as_str) {
        Some("ping") => Shape::Ping,
        Some("pong") => Shape::Pong,
        Some(BATCH_TYPE) => Shape::Batch,
        Some(_) => Shape::Event,
        None => Shape::Untyped,
    };

    match shape {
        Shape::Ping => Ok(ServerFrame::Ping),
        Shape::Pong => Ok(ServerFrame::Pong),
        Shape::Batch => match object.remove("messages") {
            Some(Value::Array(items)) => Ok(ServerFrame::Batch(batch_from_values(items))),
            _ => Err(WsError::InvalidMessage(format!(
                "{BATCH_TYPE} frame without a messages array"
            ))
            .into()),
        },
        Shape::Event => deserialize_logged::<Event>(Value::Object(object))
            .map(ServerFrame::Event)
            .map_err(|e| WsError::MessageParse(e).into()),
        Shape::Untyped => Err(WsError::InvalidMessage("frame without a type".to_owned()).into()),
    }
}

fn batch_from_values(items: Vec<Value>) -> Vec<ServerFrame> {
    items
        .into_iter()
        .filter_map(|item| match frame_from_value(item) {
            Ok(frame) => Some(frame),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Dropping malformed entry of message batch");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                None
            }
        })
        .collect()
}
