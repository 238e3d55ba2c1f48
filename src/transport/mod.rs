//! The `transport` module owns everything that touches the network.
//!
//! It frames typed values into envelopes, runs the WebSocket connections
//! (`server` accepts many, `client` keeps one alive with reconnects), and hands
//! decoded inbound messages to whoever built the connection manager.

pub mod client;
pub mod codec;
pub mod link;
pub mod message;
pub mod server;

use std::any::Any;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tungstenite::protocol::Message as WsMessage;

use crate::messager::SynchronizeHint;
use crate::topic::TopicRegistry;
use crate::utils::error::{DecodeError, MessagerError};

pub use client::{ClientConnectionManager, ConnectionState, ReconnectPolicy};
pub use link::{Link, LinkId, LinkSet};
pub use message::Envelope;
pub use server::ServerConnectionManager;

/// A decoded message received on a link.
pub struct Inbound {
    pub from: LinkId,
    pub topic: String,
    pub hint: SynchronizeHint,
    pub value: Box<dyn Any + Send>,
    /// The frame exactly as received, for relaying without re-encoding.
    pub frame: WsMessage,
}

/// Called from a receive loop for every message that decoded cleanly.
pub type InboundHandler = Arc<dyn Fn(Inbound) + Send + Sync>;

/// Called with `true` when the manager gains connectivity and `false` when it loses it.
pub type StateHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Serializes `value` and frames it as a binary WebSocket message.
pub fn encode_frame<T: Serialize>(
    topic: &str,
    value: &T,
    hint: SynchronizeHint,
) -> Result<WsMessage, MessagerError> {
    let payload = codec::encode(value)?;
    let bytes = Envelope::new(topic, payload, hint).to_bytes()?;
    Ok(WsMessage::binary(bytes))
}

/// Turns one inbound WebSocket message into a typed value.
///
/// Control frames yield `Ok(None)`. Text frames, malformed envelopes, unknown
/// topics and undecodable payloads are errors.
pub fn decode_frame(
    registry: &TopicRegistry,
    msg: &WsMessage,
) -> Result<Option<(Envelope, Box<dyn Any + Send>)>, DecodeError> {
    let bytes = match msg {
        WsMessage::Binary(bytes) => bytes,
        WsMessage::Text(_) => return Err(DecodeError::UnexpectedFrame("text")),
        _ => return Ok(None),
    };
    let envelope = Envelope::from_bytes(bytes)?;
    let value = registry.resolve(&envelope.topic)?.decode(&envelope.payload)?;
    Ok(Some((envelope, value)))
}

/// Shared receive-side handling for server and client links.
pub(crate) fn handle_frame(
    registry: &TopicRegistry,
    on_message: &InboundHandler,
    from: LinkId,
    msg: WsMessage,
) {
    match decode_frame(registry, &msg) {
        Ok(Some((envelope, value))) => {
            tracing::trace!(link = %from, topic = %envelope.topic, "frame received");
            on_message(Inbound {
                from,
                topic: envelope.topic,
                hint: envelope.hint,
                value,
                frame: msg,
            });
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(link = %from, "dropping inbound frame: {e}"),
    }
}

/// Hands queued connectivity changes to `on_state`, one at a time and in queue order.
pub(crate) async fn relay_state(mut events: mpsc::UnboundedReceiver<bool>, on_state: StateHandler) {
    while let Some(connected) = events.recv().await {
        on_state(connected);
    }
}

/// Resolves once a stop has been requested or the stop sender is gone.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests;
