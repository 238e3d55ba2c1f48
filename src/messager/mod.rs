//! The `Messager` facade.
//!
//! Application code talks to a `Messager` and never to a backend directly:
//! - `SharedMemoryMessager` delivers within the process, nothing is serialized
//! - `ServerMessager` accepts clients and relays every message between them
//! - `ClientMessager` keeps one link to a server alive, reconnecting as needed
//!
//! Every backend dispatches a submission to local listeners first, then (if
//! networked) queues it for the remote peers.

pub mod client;
pub mod input;
pub mod server;
pub mod shared_memory;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::dispatch::{Dispatcher, ListenerHandle, StateListenerHandle, StateListeners};
use crate::topic::{Topic, TopicPayload, TopicRegistry};
use crate::utils::error::MessagerError;

pub use client::ClientMessager;
pub use input::Input;
pub use server::ServerMessager;
pub use shared_memory::SharedMemoryMessager;

/// Best-effort hint on how a listener should process a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SynchronizeHint {
    /// No expectation.
    #[default]
    None,
    /// Return quickly and do the work elsewhere.
    Asynchronous,
    /// Return only once the work is done.
    Synchronous,
}

impl SynchronizeHint {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            SynchronizeHint::None => 0,
            SynchronizeHint::Asynchronous => 1,
            SynchronizeHint::Synchronous => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SynchronizeHint::None),
            1 => Some(SynchronizeHint::Asynchronous),
            2 => Some(SynchronizeHint::Synchronous),
            _ => None,
        }
    }
}

/// State shared by every backend: the registry, local listeners, state
/// listeners and the open/closed lifecycle.
pub struct MessagerCore {
    registry: TopicRegistry,
    dispatcher: Arc<Dispatcher>,
    state_listeners: Arc<StateListeners>,
    started: AtomicBool,
    closed: Arc<AtomicBool>,
}

impl MessagerCore {
    pub fn new(registry: TopicRegistry) -> Self {
        Self {
            registry,
            dispatcher: Arc::new(Dispatcher::new()),
            state_listeners: Arc::new(StateListeners::new()),
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn state_listeners(&self) -> &Arc<StateListeners> {
        &self.state_listeners
    }

    /// Started and not yet closed.
    pub fn is_open(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A flag that turns true on close, for tasks that outlive a borrow of the core.
    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Marks the core started. Returns true the first time.
    pub fn mark_started(&self) -> Result<bool, MessagerError> {
        if self.is_closed() {
            return Err(MessagerError::Closed);
        }
        Ok(!self.started.swap(true, Ordering::SeqCst))
    }

    /// Marks the core closed. Returns true the first time.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Drops every topic and state listener.
    pub fn clear(&self) {
        self.dispatcher.clear();
        self.state_listeners.clear();
    }

    pub fn ensure_open(&self) -> Result<(), MessagerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(MessagerError::Closed)
        }
    }

    /// Validates a submission and delivers it to local listeners.
    pub fn dispatch_local<T: TopicPayload>(
        &self,
        topic: &Topic<T>,
        value: &T,
        hint: SynchronizeHint,
    ) -> Result<usize, MessagerError> {
        self.ensure_open()?;
        self.registry.check(topic)?;
        Ok(self.dispatcher.dispatch(topic.name(), value, hint))
    }

    pub fn add_listener<T, F>(&self, topic: &Topic<T>, listener: F) -> Result<ListenerHandle, MessagerError>
    where
        T: TopicPayload,
        F: Fn(&T, SynchronizeHint) + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(MessagerError::Closed);
        }
        self.registry.check(topic)?;
        Ok(self.dispatcher.add_listener(topic, listener))
    }
}

/// The pub/sub contract shared by all backends.
pub trait Messager: Send + Sync {
    fn core(&self) -> &MessagerCore;

    /// Opens the messager: shared memory opens immediately, a server starts
    /// listening, a client starts connecting.
    fn start(&self) -> Result<(), MessagerError>;

    /// Brings the messager online again after `disconnect`. Same as `start`.
    fn connect(&self) -> Result<(), MessagerError> {
        self.start()
    }

    /// Drops every network link but keeps the messager open: listeners stay
    /// registered, submissions are delivered locally, and `connect` restores
    /// the links. Shared memory has no links, so the default does nothing.
    fn disconnect(&self) {}

    /// Closes the messager for good and drops every listener. Repeated calls do nothing.
    fn close(&self);

    /// Whether any peer is reachable right now (shared memory: whether open).
    fn is_connected(&self) -> bool;

    /// Delivers `value` to local listeners and, for network backends, to peers.
    fn submit_with_hint<T: TopicPayload>(
        &self,
        topic: &Topic<T>,
        value: T,
        hint: SynchronizeHint,
    ) -> Result<(), MessagerError>;

    fn submit<T: TopicPayload>(&self, topic: &Topic<T>, value: T) -> Result<(), MessagerError> {
        self.submit_with_hint(topic, value, SynchronizeHint::None)
    }

    fn registry(&self) -> &TopicRegistry {
        self.core().registry()
    }

    fn is_open(&self) -> bool {
        self.core().is_open()
    }

    fn add_topic_listener<T, F>(&self, topic: &Topic<T>, listener: F) -> Result<ListenerHandle, MessagerError>
    where
        T: TopicPayload,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core()
            .add_listener(topic, move |value: &T, _| listener(value))
    }

    fn add_topic_listener_with_hint<T, F>(
        &self,
        topic: &Topic<T>,
        listener: F,
    ) -> Result<ListenerHandle, MessagerError>
    where
        T: TopicPayload,
        F: Fn(&T, SynchronizeHint) + Send + Sync + 'static,
    {
        self.core().add_listener(topic, listener)
    }

    fn remove_topic_listener(&self, handle: &ListenerHandle) -> bool {
        self.core().dispatcher().remove_listener(handle)
    }

    /// Creates a cell that always holds the latest value seen on `topic`.
    fn create_input<T>(&self, topic: &Topic<T>, default: T) -> Result<Input<T>, MessagerError>
    where
        T: TopicPayload + Clone,
    {
        let input = Input::detached(default);
        let cell = input.clone_cell();
        let handle = self
            .core()
            .add_listener(topic, move |value: &T, _| Input::store(&cell, value.clone()))?;
        Ok(input.attach(handle))
    }

    fn remove_input<T>(&self, input: &Input<T>) -> bool {
        input
            .handle()
            .is_some_and(|handle| self.remove_topic_listener(handle))
    }

    fn add_messager_state_listener<F>(&self, listener: F) -> StateListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.core().state_listeners().add(listener)
    }

    fn remove_messager_state_listener(&self, handle: StateListenerHandle) -> bool {
        self.core().state_listeners().remove(handle)
    }

    /// Tells every state listener the current connection state.
    fn notify_messager_state_listeners(&self) {
        self.core().state_listeners().notify(self.is_connected());
    }
}
