//! Bounded outbound queue used while the socket is down.

use std::collections::VecDeque;

use tokio::time::Instant;

use super::config::QueueConfig;

/// An outbound frame waiting for the socket.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Serialized frame
    pub payload: String,
    /// Channel the frame targets, if any
    pub channel: Option<String>,
    /// When the frame was queued
    pub enqueued_at: Instant,
    /// Whether `channel` is one of the configured priority channels
    pub priority: bool,
}

/// Result of [`MessageQueue::enqueue`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum EnqueueOutcome {
    /// Stored without displacing anything
    Queued,
    /// Stored after evicting the returned, older message
    Evicted(QueuedMessage),
    /// Not stored; the returned message is the one that was offered
    Rejected(QueuedMessage),
}

#[derive(Debug)]
pub(crate) struct MessageQueue {
    config: QueueConfig,
    entries: VecDeque<QueuedMessage>,
}

impl MessageQueue {
    pub(crate) fn new(config: QueueConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity.min(1024)),
            config,
        }
    }

    pub(crate) fn is_priority(&self, channel: Option<&str>) -> bool {
        channel.is_some_and(|channel| self.config.priority_channels.contains(channel))
    }

    /// Queue a frame, making room if the queue is full.
    ///
    /// Expired entries are purged first. When full, the oldest non-priority entry is
    /// evicted. When every entry is priority, a non-priority frame is rejected and a
    /// priority frame evicts the oldest entry.
    pub(crate) fn enqueue(&mut self, payload: String, channel: Option<String>) -> EnqueueOutcome {
        self.purge_expired();

        let message = QueuedMessage {
            priority: self.is_priority(channel.as_deref()),
            payload,
            channel,
            enqueued_at: Instant::now(),
        };

        if self.config.capacity == 0 {
            return EnqueueOutcome::Rejected(message);
        }

        if self.entries.len() < self.config.capacity {
            self.entries.push_back(message);
            return EnqueueOutcome::Queued;
        }

        let victim = match self.entries.iter().position(|entry| !entry.priority) {
            Some(index) => index,
            None if message.priority => 0,
            None => return EnqueueOutcome::Rejected(message),
        };

        let Some(evicted) = self.entries.remove(victim) else {
            return EnqueueOutcome::Rejected(message);
        };
        self.entries.push_back(message);
        EnqueueOutcome::Evicted(evicted)
    }

    /// Drop entries older than the configured TTL. Returns how many were dropped.
    pub(crate) fn purge_expired(&mut self) -> usize {
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.enqueued_at.elapsed() <= ttl);
        let purged = before - self.entries.len();

        #[cfg(feature = "tracing")]
        if purged > 0 {
            tracing::debug!(purged, "Dropped expired queued messages");
        }

        purged
    }

    /// Take every live entry in FIFO order.
    pub(crate) fn drain(&mut self) -> Vec<QueuedMessage> {
        self.purge_expired();
        self.entries.drain(..).collect()
    }

    /// Put back entries that could not be sent, ahead of anything queued since.
    pub(crate) fn requeue<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = QueuedMessage>,
        I::IntoIter: DoubleEndedIterator,
    {
        for message in messages.into_iter().rev() {
            self.entries.push_front(message);
        }
        self.entries.truncate(self.config.capacity);
    }

    pub(crate) fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
