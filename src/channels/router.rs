use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;

use super::registry::ChannelRegistry;
use crate::error::Error;
use crate::protocol::{ClientFrame, Event, EventKind, ServerFrame};
use crate::ws::listeners::{ListenerHandle, ListenerSet};
use crate::ws::{FrameHandler, SystemFrame, WsError};

type EventListener = dyn Fn(&Event) + Send + Sync;
type ErrorListener = dyn Fn(&Error) + Send + Sync;

/// Demultiplexes inbound frames to channel handlers and global listeners.
///
/// Batches are unpacked in order. `ping`/`pong` never reach subscribers; they are handed
/// back to the connection. Every callback runs under `catch_unwind`, so a panicking
/// handler is reported to the error listeners and the remaining handlers still run.
pub struct Router {
    registry: Arc<ChannelRegistry>,
    event_listeners: DashMap<EventKind, Arc<ListenerSet<EventListener>>>,
    error_listeners: Arc<ListenerSet<ErrorListener>>,
}

impl Router {
    #[must_use]
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            registry,
            event_listeners: DashMap::new(),
            error_listeners: Arc::new(ListenerSet::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Call `listener` for every event of type `kind`, whatever its channel.
    pub fn on_event<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let listeners = Arc::clone(
            self.event_listeners
                .entry(kind)
                .or_insert_with(|| Arc::new(ListenerSet::new()))
                .value(),
        );
        listeners.insert(Arc::new(listener))
    }

    /// Call `listener` with every error reported by the transport or the router.
    pub fn on_error<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_listeners.insert(Arc::new(listener))
    }

    /// Dispatch `frame` and return the system frames it contained, in order.
    pub fn route(&self, frame: ServerFrame) -> Vec<SystemFrame> {
        let mut system = Vec::new();
        self.route_into(frame, &mut system);
        system
    }

    fn route_into(&self, frame: ServerFrame, system: &mut Vec<SystemFrame>) {
        match frame {
            ServerFrame::Ping => system.push(SystemFrame::Ping),
            ServerFrame::Pong => system.push(SystemFrame::Pong),
            ServerFrame::Batch(frames) => {
                for frame in frames {
                    self.route_into(frame, system);
                }
            }
            ServerFrame::Event(event) => self.dispatch(&event),
        }
    }

    fn dispatch(&self, event: &Event) {
        let mut delivered = 0_usize;

        let channel = event.route_channel();
        if let Some(channel) = channel.as_deref()
            && let Some(handlers) = self.registry.begin_delivery(channel, event)
        {
            for handler in handlers {
                delivered += 1;
                self.invoke(event, Some(channel), || handler(event));
            }
        }

        let listeners = self
            .event_listeners
            .get(&event.kind)
            .map(|listeners| listeners.snapshot())
            .unwrap_or_default();
        for listener in listeners {
            delivered += 1;
            self.invoke(event, None, || listener(event));
        }

        if delivered == 0 {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                kind = %event.kind,
                channel = channel.as_deref(),
                "Dropping event nobody listens to"
            );
        }
    }

    fn invoke<F: FnOnce()>(&self, event: &Event, channel: Option<&str>, call: F) {
        if catch_unwind(AssertUnwindSafe(call)).is_ok() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::error!(kind = %event.kind, channel, "Event handler panicked");

        self.report(
            &WsError::HandlerPanicked {
                kind: event.kind.clone(),
                channel: channel.map(str::to_owned),
            }
            .into(),
        );
    }

    /// Hand `error` to every error listener.
    pub fn report(&self, error: &Error) {
        for listener in self.error_listeners.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| listener(error))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!(%error, "Error listener panicked");
            }
        }
    }
}

impl FrameHandler for Router {
    fn on_open(&self) -> Vec<ClientFrame> {
        let frames = self.registry.resubscribe_frames();

        #[cfg(feature = "tracing")]
        if !frames.is_empty() {
            tracing::debug!(
                channels = self.registry.channel_count(),
                frames = frames.len(),
                "Re-establishing subscriptions"
            );
        }

        frames
    }

    fn on_frame(&self, frame: ServerFrame) -> Vec<SystemFrame> {
        self.route(frame)
    }

    fn on_error(&self, error: &Error) {
        self.report(error);
    }
}
