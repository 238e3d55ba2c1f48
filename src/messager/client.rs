use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, info};

use super::{Messager, MessagerCore, SynchronizeHint};
use crate::topic::{Topic, TopicPayload, TopicRegistry};
use crate::transport::{
    ClientConnectionManager, ConnectionState, Inbound, InboundHandler, ReconnectPolicy, StateHandler,
    encode_frame,
};
use crate::utils::error::MessagerError;

/// Client backend: one link to a relay server, re-established automatically.
///
/// Listeners and local submissions keep working while the link is down;
/// submissions made while disconnected are delivered locally only.
pub struct ClientMessager {
    core: MessagerCore,
    manager: ClientConnectionManager,
}

impl ClientMessager {
    pub fn new(registry: TopicRegistry, url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let core = MessagerCore::new(registry.clone());

        let on_message: InboundHandler = {
            let dispatcher = core.dispatcher().clone();
            let closed = core.closed_flag();
            Arc::new(move |inbound: Inbound| {
                if !closed.load(Ordering::SeqCst) {
                    dispatcher.dispatch(&inbound.topic, &*inbound.value, inbound.hint);
                }
            })
        };
        let on_state: StateHandler = {
            let listeners = core.state_listeners().clone();
            let closed = core.closed_flag();
            Arc::new(move |connected| {
                if !closed.load(Ordering::SeqCst) {
                    listeners.notify(connected);
                }
            })
        };

        Self {
            manager: ClientConnectionManager::new(registry, url, policy, on_message, on_state),
            core,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn url(&self) -> &str {
        self.manager.url()
    }
}

impl Messager for ClientMessager {
    fn core(&self) -> &MessagerCore {
        &self.core
    }

    /// Starts connecting in the background. Must be called inside a tokio runtime.
    fn start(&self) -> Result<(), MessagerError> {
        if self.core.is_closed() {
            return Err(MessagerError::Closed);
        }
        self.manager.connect()?;
        if self.core.mark_started()? {
            info!("Client messager started for {}", self.manager.url());
        }
        Ok(())
    }

    /// Drops the link and stops retrying.
    fn disconnect(&self) {
        self.manager.disconnect();
    }

    fn close(&self) {
        let was_connected = self.is_connected();
        if !self.core.mark_closed() {
            return;
        }
        self.manager.disconnect();
        if was_connected {
            self.core.state_listeners().notify(false);
        }
        self.core.clear();
        info!("Client messager closed");
    }

    fn is_connected(&self) -> bool {
        self.core.is_open() && self.manager.state() == ConnectionState::Connected
    }

    fn submit_with_hint<T: TopicPayload>(
        &self,
        topic: &Topic<T>,
        value: T,
        hint: SynchronizeHint,
    ) -> Result<(), MessagerError> {
        self.core.ensure_open()?;
        self.core.registry().check(topic)?;
        let frame = encode_frame(topic.name(), &value, hint)?;

        self.core.dispatch_local(topic, &value, hint)?;
        if !self.manager.send(frame) {
            debug!(topic = topic.name(), "not connected, delivered locally only");
        }
        Ok(())
    }
}
