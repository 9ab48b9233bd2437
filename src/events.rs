//! Listener registries for named event topics.
//!
//! An [`EventBus`] hands out a [`ListenerId`] per subscription so listeners can
//! be removed pairwise. Listeners are called outside the registry lock, so a
//! listener may itself subscribe or unsubscribe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A set of listeners for one topic.
pub struct EventBus<T> {
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener, in subscription order.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = self.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener<T>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsubscribes its listener when dropped.
pub struct Subscription<'a, T> {
    bus: &'a EventBus<T>,
    id: ListenerId,
}

impl<'a, T> Subscription<'a, T> {
    pub fn new<F>(bus: &'a EventBus<T>, listener: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = bus.subscribe(listener);
        Self { bus, id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl<T> Drop for Subscription<'_, T> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
