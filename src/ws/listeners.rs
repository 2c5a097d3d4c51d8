//! Listener registrations that deregister when their handle is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// An ordered set of listeners. Invocation order is registration order.
pub(crate) struct ListenerSet<T: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Arc<T>)>>,
}

impl<T: ?Sized + Send + Sync + 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register `listener`; it stays registered until the returned handle is dropped.
    pub(crate) fn insert(self: &Arc<Self>, listener: Arc<T>) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));

        let set: Weak<Self> = Arc::downgrade(self);
        ListenerHandle::new(move || {
            if let Some(set) = set.upgrade() {
                set.remove(id);
            }
        })
    }

    fn remove(&self, id: u64) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(entry, _)| *entry != id);
    }

    /// Clone the current listeners so they can be invoked without holding the lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Keeps a listener registered. Dropping it (or calling [`ListenerHandle::remove`])
/// removes the listener.
#[must_use = "the listener is removed as soon as the handle is dropped"]
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub(crate) fn new<F>(remove: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Remove the listener now.
    pub fn remove(mut self) {
        self.run();
    }

    /// Keep the listener registered for the lifetime of the client.
    pub fn detach(mut self) {
        self.remove = None;
    }

    fn run(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.run();
    }
}
