use std::sync::{Arc, PoisonError, RwLock};

use crate::dispatch::ListenerHandle;

/// Latest value received on a topic.
///
/// Created by `Messager::create_input`; updated by the messager every time a
/// value is delivered on the topic, locally submitted or received.
#[derive(Debug)]
pub struct Input<T> {
    cell: Arc<RwLock<T>>,
    handle: Option<ListenerHandle>,
}

impl<T> Input<T> {
    pub(crate) fn detached(initial: T) -> Self {
        Self {
            cell: Arc::new(RwLock::new(initial)),
            handle: None,
        }
    }

    pub(crate) fn clone_cell(&self) -> Arc<RwLock<T>> {
        self.cell.clone()
    }

    pub(crate) fn attach(mut self, handle: ListenerHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub(crate) fn store(cell: &RwLock<T>, value: T) {
        *cell.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn handle(&self) -> Option<&ListenerHandle> {
        self.handle.as_ref()
    }

    /// Overwrites the held value locally; nothing is submitted.
    pub fn set(&self, value: T) {
        Self::store(&self.cell, value);
    }
}

impl<T: Clone> Input<T> {
    pub fn get(&self) -> T {
        self.cell
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
