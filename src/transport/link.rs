//! Link representation
//!
//! A `Link` is one live WebSocket connection as seen by the rest of the crate:
//! an id plus the sending half of the per-link outbound queue. The send loop
//! owning the socket drains that queue, so pushing onto it never blocks.
//!
//! `LinkSet` is the server's active-connection set.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

pub type LinkId = Uuid;

#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    pub peer: Option<SocketAddr>,
    sender: UnboundedSender<WsMessage>,
}

impl Link {
    pub fn new(sender: UnboundedSender<WsMessage>, peer: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            sender,
        }
    }

    /// Queues `msg` for this link. Returns false once the send loop has gone away.
    pub fn send(&self, msg: WsMessage) -> bool {
        self.sender.send(msg).is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    links: Arc<RwLock<HashMap<LinkId, Link>>>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `link` and returns the number of links afterwards.
    pub fn insert(&self, link: Link) -> usize {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        links.insert(link.id, link);
        links.len()
    }

    /// Removes a link, returning how many remain, or `None` if it was not present.
    pub fn remove(&self, id: &LinkId) -> Option<usize> {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        links.remove(id).map(|_| links.len())
    }

    pub fn contains(&self, id: &LinkId) -> bool {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Link> {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Queues `msg` on every link and returns how many accepted it.
    pub fn broadcast(&self, msg: &WsMessage) -> usize {
        self.send_where(msg, |_| true)
    }

    /// Queues `msg` on every link except `origin`.
    pub fn broadcast_except(&self, origin: &LinkId, msg: &WsMessage) -> usize {
        self.send_where(msg, |link| link.id != *origin)
    }

    fn send_where(&self, msg: &WsMessage, include: impl Fn(&Link) -> bool) -> usize {
        // send outside the lock
        self.snapshot()
            .into_iter()
            .filter(|link| include(link))
            .filter(|link| link.send(msg.clone()))
            .count()
    }
}
