//! WebSocket client transport
//!
//! Keeps one outbound link to a relay server alive. `connect` spawns a session
//! task that walks the state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> (backoff) -> Connecting ...
//! ```
//!
//! Failed attempts and dropped links are retried with capped exponential
//! backoff. `disconnect` ends the session: any pending attempt or backoff
//! wait is cancelled and the socket is closed once by its send loop.
//!
//! Connectivity changes are queued while the status lock is held and handed to
//! the state handler by a single task, so handlers never see them reordered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::{
    InboundHandler, Link, LinkId, StateHandler, handle_frame, relay_state, stop_requested,
};
use crate::topic::TopicRegistry;
use crate::utils::error::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Connect timeout plus the backoff used between attempts.
///
/// The delay before retry `n` (starting at 0) is `initial * 2^n`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    connect_timeout: Duration,
    initial: Duration,
    max: Duration,
}

impl ReconnectPolicy {
    pub fn new(connect_timeout: Duration, initial: Duration, max: Duration) -> Self {
        // a zero delay would spin
        let initial = initial.max(Duration::from_millis(1));
        Self {
            connect_timeout,
            initial,
            max: max.max(initial),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(5),
            Duration::from_millis(250),
            Duration::from_secs(5),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    Stopped,
    Dropped,
}

/// Connection state plus the last connectivity value handed to the state handler.
struct Status {
    connection: ConnectionState,
    announced: bool,
}

impl Status {
    fn announce(&mut self, connected: bool, events: &mpsc::UnboundedSender<bool>) {
        if self.announced != connected {
            self.announced = connected;
            let _ = events.send(connected);
        }
    }
}

struct ClientShared {
    registry: TopicRegistry,
    url: String,
    policy: ReconnectPolicy,
    on_message: InboundHandler,
    /// Queued under the status lock, so `relay_state` sees them in order.
    events: mpsc::UnboundedSender<bool>,
    /// Bumped by every `connect`; a session only touches state while it is current.
    generation: AtomicU64,
    status: Mutex<Status>,
    link: RwLock<Option<Link>>,
}

impl ClientShared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, generation: u64, next: ConnectionState) {
        let mut status = self.status();
        if self.is_current(generation) {
            status.connection = next;
        }
    }

    /// Installs `link` and announces the connection, unless the session was
    /// superseded or asked to stop.
    fn attach(&self, generation: u64, link: Link, stop: &watch::Receiver<bool>) -> bool {
        let mut status = self.status();
        if !self.is_current(generation) || *stop.borrow() {
            return false;
        }
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(link);
        status.connection = ConnectionState::Connected;
        status.announce(true, &self.events);
        true
    }

    /// Removes the link if `disconnect` has not already done so. Only the
    /// current session reports the loss.
    fn detach(&self, generation: u64, id: &LinkId) {
        let mut status = self.status();
        {
            let mut slot = self.link.write().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|link| link.id == *id) {
                *slot = None;
            }
        }
        if self.is_current(generation) {
            status.connection = ConnectionState::Disconnected;
            status.announce(false, &self.events);
        }
    }

    async fn run(self: Arc<Self>, generation: u64, mut stop: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(generation, ConnectionState::Connecting);
            debug!("Connecting to {} (attempt {})", self.url, attempt + 1);

            let connect = timeout(
                self.policy.connect_timeout(),
                connect_async(self.url.as_str()),
            );
            let result = tokio::select! {
                _ = stop_requested(&mut stop) => break,
                result = connect => result,
            };

            match result {
                Ok(Ok((ws_stream, _response))) => {
                    attempt = 0;
                    if self.serve(generation, ws_stream, &mut stop).await == LinkEnd::Stopped {
                        break;
                    }
                }
                Ok(Err(e)) => warn!("{}", ConnectionError::from(e)),
                Err(_) => warn!(
                    "{}",
                    ConnectionError::Timeout(self.policy.connect_timeout())
                ),
            }

            self.set_state(generation, ConnectionState::Disconnected);
            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!("Retrying {} in {delay:?}", self.url);

            tokio::select! {
                _ = stop_requested(&mut stop) => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(generation, ConnectionState::Disconnected);
        debug!("Session for {} ended", self.url);
    }

    async fn serve(
        &self,
        generation: u64,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        stop: &mut watch::Receiver<bool>,
    ) -> LinkEnd {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let link = Link::new(tx, None);
        let link_id = link.id;

        if !self.attach(generation, link, stop) {
            let _ = ws_sender.close().await;
            return LinkEnd::Stopped;
        }
        info!("Connected to {} as {link_id}", self.url);

        let send_loop = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!("Failed to send message on {link_id}: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let end = loop {
            let next = tokio::select! {
                _ = stop_requested(stop) => break LinkEnd::Stopped,
                next = ws_receiver.next() => next,
            };

            match next {
                Some(Ok(WsMessage::Close(_))) | None => break LinkEnd::Dropped,
                Some(Err(e)) => {
                    warn!("Link {link_id} to {} failed: {e}", self.url);
                    break LinkEnd::Dropped;
                }
                Some(Ok(msg)) => handle_frame(&self.registry, &self.on_message, link_id, msg),
            }
        };

        // dropping the queue sender lets the send loop close the socket
        self.detach(generation, &link_id);
        let _ = send_loop.await;
        info!("Disconnected from {}", self.url);
        end
    }
}

struct Session {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct ClientConnectionManager {
    shared: Arc<ClientShared>,
    session: Mutex<Option<Session>>,
    /// Taken by the first `connect`, which spawns the task delivering state events.
    notifier: Mutex<Option<(mpsc::UnboundedReceiver<bool>, StateHandler)>>,
}

impl ClientConnectionManager {
    pub fn new(
        registry: TopicRegistry,
        url: impl Into<String>,
        policy: ReconnectPolicy,
        on_message: InboundHandler,
        on_state: StateHandler,
    ) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(ClientShared {
                registry,
                url: url.into(),
                policy,
                on_message,
                events,
                generation: AtomicU64::new(0),
                status: Mutex::new(Status {
                    connection: ConnectionState::Disconnected,
                    announced: false,
                }),
                link: RwLock::new(None),
            }),
            session: Mutex::new(None),
            notifier: Mutex::new(Some((events_rx, on_state))),
        }
    }

    /// Starts a session on the current tokio runtime. A no-op while one is running.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        let handle = Handle::try_current()?;
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return Ok(());
        }

        let notifier = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((events, on_state)) = notifier {
            handle.spawn(relay_state(events, on_state));
        }

        let generation = {
            let mut status = self.shared.status();
            status.connection = ConnectionState::Connecting;
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let (stop, stop_rx) = watch::channel(false);
        let task = handle.spawn(self.shared.clone().run(generation, stop_rx));
        *session = Some(Session { stop, task });
        Ok(())
    }

    /// Ends the current session without scheduling a retry.
    ///
    /// The link is released before this returns, so nothing sent afterwards
    /// reaches the server.
    pub fn disconnect(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(session) = session else {
            return;
        };

        let released = {
            let mut status = self.shared.status();
            status.connection = if session.task.is_finished() {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Closing
            };
            let released = self
                .shared
                .link
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            status.announce(false, &self.shared.events);
            session.stop.send_replace(true);
            released
        };
        // the send loop closes the socket once its queue is gone
        drop(released);
        info!("Disconnecting from {}", self.shared.url);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status().connection
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Queues `msg` on the server link. Returns false while not connected.
    pub fn send(&self, msg: WsMessage) -> bool {
        self.shared
            .link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|link| link.send(msg))
    }
}

impl Drop for ClientConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
