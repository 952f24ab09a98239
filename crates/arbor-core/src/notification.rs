//! Change events and listener registry

use crate::delta::ElementDelta;
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeEventKind {
    /// Fired after the model changed, e.g. a working copy was created.
    PostChange,
    /// Fired after a working copy was reconciled with its buffer.
    PostReconcile,
}

#[derive(Debug, Clone)]
pub struct ElementChangeEvent {
    pub kind: ChangeEventKind,
    pub delta: ElementDelta,
}

impl ElementChangeEvent {
    pub fn post_change(delta: ElementDelta) -> Self {
        ElementChangeEvent {
            kind: ChangeEventKind::PostChange,
            delta,
        }
    }

    pub fn post_reconcile(delta: ElementDelta) -> Self {
        ElementChangeEvent {
            kind: ChangeEventKind::PostReconcile,
            delta,
        }
    }
}

/// Where the model publishes change events. Delivery is never retried.
pub trait NotificationSink: Send + Sync {
    fn fire_change(&self, event: ElementChangeEvent);
}

pub trait ElementChangeListener: Send + Sync {
    fn element_changed(&self, event: &ElementChangeEvent);
}

impl<F> ElementChangeListener for F
where
    F: Fn(&ElementChangeEvent) + Send + Sync,
{
    fn element_changed(&self, event: &ElementChangeEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Fans events out to registered listeners. Thread-safe for concurrent
/// registration and delivery.
pub struct NotificationManager {
    listeners: DashMap<ListenerId, Arc<dyn ElementChangeListener>>,
    next_id: AtomicU64,
}

impl NotificationManager {
    pub fn new() -> Self {
        NotificationManager {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_listener(&self, listener: impl ElementChangeListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for NotificationManager {
    fn fire_change(&self, event: ElementChangeEvent) {
        // Listeners run without holding map shards, so they may (un)register.
        let mut listeners: Vec<(ListenerId, Arc<dyn ElementChangeListener>)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        debug!(
            "Delivering {:?} event for {} to {} listeners",
            event.kind,
            event.delta.element(),
            listeners.len()
        );
        for (id, listener) in listeners {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.element_changed(&event)));
            if result.is_err() {
                warn!("Listener {:?} panicked while handling {:?} event", id, event.kind);
            }
        }
    }
}
