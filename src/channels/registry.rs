use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::{DashMap, Entry};

use crate::Result;
use crate::error::Error;
use crate::protocol::{ClientFrame, Event};
use crate::ws::ConnectionManager;

/// Callback invoked for every event delivered on a channel.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct ChannelEntry {
    /// Insertion order is invocation order
    handlers: Vec<(u64, Handler)>,
    /// Highest event id delivered on this channel, `0` when none was seen
    last_event_id: u64,
}

/// Tracks which channels have subscribers and how far each channel has been read.
///
/// The first handler on a channel sends `subscribe`, the last one to leave sends
/// `unsubscribe`; handlers in between cause no wire traffic. Control frames are sent
/// while the channel entry is locked so that the order on the wire matches the order
/// of registry changes.
pub struct ChannelRegistry {
    connection: ConnectionManager,
    channels: DashMap<String, ChannelEntry>,
    next_handler_id: AtomicU64,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            channels: DashMap::new(),
            next_handler_id: AtomicU64::new(0),
        }
    }

    /// Register `handler` on `channel`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is dropped or
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(self: &Arc<Self>, channel: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if channel.trim().is_empty() {
            return Err(Error::validation("channel name cannot be empty"));
        }

        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let handler: Handler = Arc::new(handler);

        match self.channels.entry(channel.to_owned()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().handlers.push((id, handler));
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    channel,
                    handlers = entry.get().handlers.len(),
                    "Added handler to subscribed channel"
                );
            }
            Entry::Vacant(entry) => {
                let _entry = entry.insert(ChannelEntry {
                    handlers: vec![(id, handler)],
                    last_event_id: 0,
                });
                #[cfg(feature = "tracing")]
                tracing::debug!(channel, "Subscribing to channel");
                self.connection.send_control(ClientFrame::subscribe(channel));
            }
        }

        Ok(Subscription {
            registry: Arc::downgrade(self),
            channel: channel.to_owned(),
            id,
            active: true,
        })
    }

    /// Remove one handler. Returns `false` if it was not registered.
    fn remove_handler(&self, channel: &str, id: u64) -> bool {
        let Entry::Occupied(mut entry) = self.channels.entry(channel.to_owned()) else {
            return false;
        };

        let handlers = &mut entry.get_mut().handlers;
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::debug!(channel, "Last handler gone, unsubscribing from channel");
            self.connection.send_control(ClientFrame::unsubscribe(channel));
            entry.remove();
        }

        removed
    }

    /// Record delivery of `event` on `channel` and return the handlers to invoke.
    ///
    /// The stored last event id only ever moves forward; replayed or out-of-order events
    /// are still delivered. Returns `None` when nobody listens on `channel`.
    pub(crate) fn begin_delivery(&self, channel: &str, event: &Event) -> Option<Vec<Handler>> {
        let mut entry = self.channels.get_mut(channel)?;

        if let Some(id) = event.id
            && id > entry.last_event_id
        {
            entry.last_event_id = id;
        }

        Some(
            entry
                .handlers
                .iter()
                .map(|(_, handler)| Arc::clone(handler))
                .collect(),
        )
    }

    /// Frames that restore every subscription on a fresh socket.
    ///
    /// One `subscribe` per channel, followed by a `catchup` for channels that have seen
    /// at least one event. Channels are visited in name order.
    #[must_use]
    pub fn resubscribe_frames(&self) -> Vec<ClientFrame> {
        let mut channels: Vec<(String, u64)> = self
            .channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_event_id))
            .collect();
        channels.sort_unstable();

        let mut frames = Vec::with_capacity(channels.len() * 2);
        for (channel, last_event_id) in channels {
            frames.push(ClientFrame::subscribe(channel.as_str()));
            if last_event_id > 0 {
                frames.push(ClientFrame::catchup(channel, last_event_id));
            }
        }
        frames
    }

    /// Highest event id delivered on `channel`.
    #[must_use]
    pub fn last_event_id(&self, channel: &str) -> Option<u64> {
        self.channels.get(channel).map(|entry| entry.last_event_id)
    }

    /// Number of channels with at least one handler.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of handlers registered on `channel`.
    #[must_use]
    pub fn handler_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |entry| entry.handlers.len())
    }

    /// Channels with at least one handler, sorted by name.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        channels.sort_unstable();
        channels
    }
}

/// Keeps a handler registered on a channel.
///
/// Dropping the subscription removes the handler; removing the last handler of a channel
/// unsubscribes from it.
#[must_use = "the handler is removed as soon as the subscription is dropped"]
pub struct Subscription {
    registry: Weak<ChannelRegistry>,
    channel: String,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Channel this subscription listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the handler now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_handler(&self.channel, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
