//! Wire protocol spoken over the single dashboard WebSocket.
//!
//! Outbound frames are JSON objects tagged by `action`; inbound frames are tagged by `type`.
//! Only the envelope is modelled here (channel, session id, event id, batching and the
//! ping/pong system frames). Event payloads stay as JSON for consumers to interpret.

pub mod request;
pub mod response;

pub use request::ClientFrame;
pub use response::{Event, EventKind, ServerFrame, parse_frame};
