//! Channel naming helpers and re-exported types from external crates.
//!
//! Channel names are plain strings on the wire. The helpers here only exist so that
//! callers and the router agree on how a per-session channel is spelled.

/// Parsed URL type used by [`crate::Endpoint`] and the health check configuration.
pub use url::Url;
/// Per-session client identifier embedded in dashboard connect URLs.
pub use uuid::Uuid;

/// Shared channel carrying dashboard-wide updates (session list, counters).
pub const DASHBOARD_CHANNEL: &str = "dashboard_updates";

/// Shared channel carrying session lifecycle notifications.
pub const SESSIONS_CHANNEL: &str = "sessions";

/// Prefix of per-session channels, e.g. `session:42`.
pub const SESSION_CHANNEL_PREFIX: &str = "session:";

/// Build the channel name for a single session.
///
/// # Example
/// ```
/// use dashboard_realtime::types::session_channel;
/// assert_eq!(session_channel("42"), "session:42");
/// ```
#[must_use]
pub fn session_channel(session_id: &str) -> String {
    format!("{SESSION_CHANNEL_PREFIX}{session_id}")
}

/// Return the session id if `channel` is a per-session channel.
#[must_use]
pub fn session_id_of(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(SESSION_CHANNEL_PREFIX)
        .filter(|id| !id.is_empty())
}
