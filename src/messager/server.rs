use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, info};

use super::{Messager, MessagerCore, SynchronizeHint};
use crate::topic::{Topic, TopicPayload, TopicRegistry};
use crate::transport::{Inbound, InboundHandler, LinkSet, ServerConnectionManager, StateHandler, encode_frame};
use crate::utils::error::MessagerError;

/// Relay backend.
///
/// Every message a client sends is dispatched to this process's listeners
/// and forwarded, unchanged, to every other connected client. Local
/// submissions go to every client.
pub struct ServerMessager {
    core: MessagerCore,
    addr: String,
    manager: ServerConnectionManager,
}

impl ServerMessager {
    /// `addr` is a `host:port` pair; port 0 picks a free port (see `local_addr`).
    pub fn new(registry: TopicRegistry, addr: impl Into<String>) -> Self {
        let core = MessagerCore::new(registry.clone());
        let links = LinkSet::new();

        let on_message: InboundHandler = {
            let dispatcher = core.dispatcher().clone();
            let closed = core.closed_flag();
            let links = links.clone();
            Arc::new(move |inbound: Inbound| {
                if closed.load(Ordering::SeqCst) {
                    return;
                }
                dispatcher.dispatch(&inbound.topic, &*inbound.value, inbound.hint);
                let relayed = links.broadcast_except(&inbound.from, &inbound.frame);
                debug!(topic = %inbound.topic, relayed, "relayed from {}", inbound.from);
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
            manager: ServerConnectionManager::new(registry, links, on_message, on_state),
            core,
            addr: addr.into(),
        }
    }

    /// The bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.manager.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.manager.client_count()
    }
}

impl Messager for ServerMessager {
    fn core(&self) -> &MessagerCore {
        &self.core
    }

    /// Binds and starts accepting clients. Must be called inside a tokio runtime.
    fn start(&self) -> Result<(), MessagerError> {
        if self.core.is_closed() {
            return Err(MessagerError::Closed);
        }
        self.manager.start(&self.addr)?;
        self.core.mark_started()?;
        Ok(())
    }

    /// Stops listening and closes every client link. `connect` binds again.
    fn disconnect(&self) {
        if self.core.is_open() {
            self.manager.stop();
        }
    }

    fn close(&self) {
        let was_connected = self.is_connected();
        if !self.core.mark_closed() {
            return;
        }
        self.manager.stop();
        if was_connected {
            self.core.state_listeners().notify(false);
        }
        self.core.clear();
        info!("Server messager closed");
    }

    fn is_connected(&self) -> bool {
        self.core.is_open() && self.manager.client_count() > 0
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
        let sent = self.manager.broadcast(&frame);
        debug!(topic = topic.name(), sent, "submitted");
        Ok(())
    }
}
