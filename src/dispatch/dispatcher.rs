use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use super::isolate;
use crate::messager::SynchronizeHint;
use crate::topic::Topic;

type ListenerFn = Arc<dyn Fn(&dyn Any, SynchronizeHint) + Send + Sync>;

/// Identifies one listener registration; pass it back to remove the listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    topic: Arc<str>,
    id: u64,
}

impl ListenerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Clone)]
struct Entry {
    id: u64,
    listener: ListenerFn,
}

/// Per-topic listener lists.
///
/// Each list sits behind an `Arc`; dispatch clones the `Arc` and delivers
/// outside the lock, while add/remove copy the list if a dispatch still
/// holds the old one.
#[derive(Default)]
pub struct Dispatcher {
    listeners: RwLock<HashMap<Arc<str>, Arc<Vec<Entry>>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed listener on `topic`.
    pub fn add_listener<T, F>(&self, topic: &Topic<T>, listener: F) -> ListenerHandle
    where
        T: 'static,
        F: Fn(&T, SynchronizeHint) + Send + Sync + 'static,
    {
        let erased: ListenerFn = Arc::new(move |value: &dyn Any, hint| {
            if let Some(value) = value.downcast_ref::<T>() {
                listener(value, hint);
            }
        });
        self.add_erased(topic.name(), erased)
    }

    fn add_erased(&self, topic: &str, listener: ListenerFn) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);

        let topic: Arc<str> = match listeners.get_key_value(topic) {
            Some((key, _)) => key.clone(),
            None => topic.into(),
        };
        Arc::make_mut(listeners.entry(topic.clone()).or_default()).push(Entry { id, listener });

        ListenerHandle { topic, id }
    }

    /// Returns false if the handle was already removed.
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = listeners.get_mut(&handle.topic) else {
            return false;
        };
        let Some(index) = list.iter().position(|entry| entry.id == handle.id) else {
            return false;
        };

        Arc::make_mut(list).remove(index);
        if list.is_empty() {
            listeners.remove(&handle.topic);
        }
        true
    }

    /// Delivers `value` to the listeners registered on `topic` when this call
    /// starts, in registration order. Returns how many listeners ran cleanly.
    pub fn dispatch(&self, topic: &str, value: &dyn Any, hint: SynchronizeHint) -> usize {
        let snapshot = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned();
        let Some(snapshot) = snapshot else {
            trace!(topic, "no listeners");
            return 0;
        };

        snapshot
            .iter()
            .filter(|entry| isolate(topic, || (entry.listener)(value, hint)))
            .count()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, |list| list.len())
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
