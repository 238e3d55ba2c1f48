//! WebSocket relay server transport
//!
//! Accepts TCP/WebSocket connections and keeps one `Link` per client in the
//! active set. Each link gets:
//! - a receive loop that decodes frames and hands them to the `InboundHandler`
//! - a send loop that drains the link's outbound queue into the socket
//!
//! The state handler fires when the active set goes from empty to non-empty
//! and back, from one task, in the order the set changed. Stopping the manager ends every loop and closes every socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::{
    InboundHandler, Link, LinkId, LinkSet, StateHandler, handle_frame, relay_state, stop_requested,
};
use crate::topic::TopicRegistry;
use crate::utils::error::ConnectionError;

struct ServerShared {
    registry: TopicRegistry,
    links: LinkSet,
    on_message: InboundHandler,
    /// Held while a link joins or leaves, so connectivity events queue in order.
    membership: Mutex<()>,
    events: mpsc::UnboundedSender<bool>,
}

impl ServerShared {
    fn join(&self, link: Link) {
        let _membership = self.membership.lock().unwrap_or_else(PoisonError::into_inner);
        if self.links.insert(link) == 1 {
            let _ = self.events.send(true);
        }
    }

    fn leave(&self, id: &LinkId) {
        let _membership = self.membership.lock().unwrap_or_else(PoisonError::into_inner);
        if self.links.remove(id) == Some(0) {
            let _ = self.events.send(false);
        }
    }
}

struct Listening {
    stop: watch::Sender<bool>,
    local_addr: SocketAddr,
}

pub struct ServerConnectionManager {
    shared: Arc<ServerShared>,
    listening: Mutex<Option<Listening>>,
    /// Taken by the first successful `start`, which spawns the task delivering state events.
    notifier: Mutex<Option<(mpsc::UnboundedReceiver<bool>, StateHandler)>>,
}

impl ServerConnectionManager {
    /// `links` is filled by the accept loop; the caller may keep a clone to relay through.
    pub fn new(
        registry: TopicRegistry,
        links: LinkSet,
        on_message: InboundHandler,
        on_state: StateHandler,
    ) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(ServerShared {
                registry,
                links,
                on_message,
                membership: Mutex::new(()),
                events,
            }),
            listening: Mutex::new(None),
            notifier: Mutex::new(Some((events_rx, on_state))),
        }
    }

    /// Binds `addr` and starts accepting clients on the current tokio runtime.
    ///
    /// Returns the bound address (useful with port 0). Calling `start` while
    /// already listening returns the existing address.
    pub fn start(&self, addr: &str) -> Result<SocketAddr, ConnectionError> {
        let mut listening = self.listening.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = listening.as_ref() {
            return Ok(current.local_addr);
        }

        let handle = Handle::try_current()?;
        let bind_err = |source| ConnectionError::Bind {
            addr: addr.to_string(),
            source,
        };

        let std_listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = std_listener.local_addr().map_err(bind_err)?;
        let listener = {
            let _guard = handle.enter();
            TcpListener::from_std(std_listener).map_err(bind_err)?
        };

        let notifier = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((events, on_state)) = notifier {
            handle.spawn(relay_state(events, on_state));
        }

        let (stop, stop_rx) = watch::channel(false);
        handle.spawn(accept_loop(listener, self.shared.clone(), stop_rx));

        info!("Relay server listening on ws://{local_addr}");
        *listening = Some(Listening { stop, local_addr });
        Ok(local_addr)
    }

    /// Stops accepting and closes every client link.
    pub fn stop(&self) {
        let listening = self
            .listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listening) = listening {
            listening.stop.send_replace(true);
            info!("Relay server on {} stopping", listening.local_addr);
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.local_addr)
    }

    pub fn links(&self) -> &LinkSet {
        &self.shared.links
    }

    pub fn client_count(&self) -> usize {
        self.shared.links.len()
    }

    /// Queues `msg` on every connected client.
    pub fn broadcast(&self, msg: &WsMessage) -> usize {
        self.shared.links.broadcast(msg)
    }
}

impl Drop for ServerConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<ServerShared>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop_requested(&mut stop) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tokio::spawn(serve_client(stream, peer, shared.clone(), stop.clone()));
            }
            Err(e) => {
                warn!("Accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    debug!("Accept loop closed");
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<ServerShared>,
    mut stop: watch::Receiver<bool>,
) {
    let handshake = tokio::select! {
        _ = stop_requested(&mut stop) => return,
        handshake = accept_async(stream) => handshake,
    };
    let ws_stream = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error from {peer}: {e}");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let link = Link::new(tx, Some(peer));
    let link_id = link.id;

    shared.join(link);
    info!("Client {link_id} connected from {peer}");

    let cleanup_called = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let shared = shared.clone();
        let cleanup_called = cleanup_called.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                shared.leave(&link_id);
                info!("Client {link_id} disconnected");
            }
        }
    };

    let mut send_loop = {
        let do_cleanup = do_cleanup.clone();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!("Failed to send message to {link_id}: {e}");
                    break;
                }
            }

            let _ = ws_sender.close().await;
            do_cleanup();
            debug!("Send loop closed for {link_id}");
        })
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = stop_requested(&mut stop) => break,
            // a failed send has already removed the link; stop relaying for it
            _ = &mut send_loop => break,
            next = ws_receiver.next() => next,
        };

        match next {
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!("Receive error from {link_id}: {e}");
                break;
            }
            Some(Ok(msg)) => handle_frame(&shared.registry, &shared.on_message, link_id, msg),
        }
    }

    do_cleanup();
}
