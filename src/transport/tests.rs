use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tungstenite::protocol::Message as WsMessage;

use super::codec;
use super::{
    ClientConnectionManager, ConnectionState, Envelope, Inbound, InboundHandler, Link, LinkSet,
    ReconnectPolicy, ServerConnectionManager, StateHandler, decode_frame, encode_frame,
};
use crate::messager::SynchronizeHint;
use crate::topic::TopicRegistry;
use crate::utils::error::{DecodeError, RegistrationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Telemetry {
    id: u32,
    tags: Vec<String>,
    voltage: Option<f32>,
}

fn registry() -> TopicRegistry {
    let mut builder = TopicRegistry::builder();
    builder.declare_topic::<bool>("cmd.start").unwrap();
    builder.declare_topic::<Telemetry>("robot.telemetry").unwrap();
    builder.build()
}

#[test]
fn test_envelope_wire_layout() {
    let envelope = Envelope::new("a.b", vec![0xAA, 0xBB], SynchronizeHint::Synchronous);
    let bytes = envelope.to_bytes().unwrap();

    assert_eq!(bytes, vec![2, 0, 3, b'a', b'.', b'b', 0xAA, 0xBB]);
    assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);
}

#[test]
fn test_envelope_with_empty_payload() {
    let bytes = Envelope::new("cmd.stop", Vec::new(), SynchronizeHint::None)
        .to_bytes()
        .unwrap();
    let decoded = Envelope::from_bytes(&bytes).unwrap();

    assert_eq!(decoded.topic, "cmd.stop");
    assert!(decoded.payload.is_empty());
}

#[test]
fn test_malformed_envelopes() {
    let cases: [(&[u8], &str); 4] = [
        (&[0, 0], "truncated header"),
        (&[5, 0, 1, b'x'], "unknown synchronize hint"),
        (&[0, 0, 9, b'a', b'b'], "truncated topic name"),
        (&[0, 0, 2, 0xFF, 0xFE], "topic name is not UTF-8"),
    ];

    for (bytes, reason) in cases {
        match Envelope::from_bytes(bytes) {
            Err(DecodeError::MalformedEnvelope(got)) => assert_eq!(got, reason),
            other => panic!("expected {reason}, got {other:?}"),
        }
    }
}

#[test]
fn test_oversized_topic_name_cannot_be_framed() {
    let name = "t".repeat(usize::from(u16::MAX) + 1);
    let envelope = Envelope::new(name, Vec::new(), SynchronizeHint::None);
    assert!(matches!(
        envelope.to_bytes(),
        Err(DecodeError::MalformedEnvelope(_))
    ));
}

#[test]
fn test_codec_handles_nested_payloads() {
    let value = Telemetry {
        id: 7,
        tags: vec!["arm".into(), "left".into()],
        voltage: None,
    };
    let bytes = codec::encode(&value).unwrap();
    assert_eq!(codec::decode::<Telemetry>(&bytes).unwrap(), value);
    assert!(codec::decode::<Telemetry>(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn test_codec_preserves_special_floats() {
    let values = [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0, f64::MIN_POSITIVE];
    for value in values {
        let decoded = codec::decode::<f64>(&codec::encode(&value).unwrap()).unwrap();
        assert_eq!(decoded.to_bits(), value.to_bits());
    }
}

#[test]
fn test_nan_payload_survives_the_wire() {
    let mut builder = TopicRegistry::builder();
    builder.declare_topic::<f64>("robot.state.x").unwrap();
    let registry = builder.build();

    let frame = encode_frame("robot.state.x", &f64::NAN, SynchronizeHint::None).unwrap();
    let (_, value) = decode_frame(&registry, &frame).unwrap().unwrap();
    assert!(value.downcast::<f64>().unwrap().is_nan());
}

#[test]
fn test_decode_frame_resolves_through_registry() {
    let registry = registry();
    let value = Telemetry {
        id: 1,
        tags: Vec::new(),
        voltage: Some(11.5),
    };
    let frame = encode_frame("robot.telemetry", &value, SynchronizeHint::Asynchronous).unwrap();

    let (envelope, decoded) = decode_frame(&registry, &frame).unwrap().unwrap();
    assert_eq!(envelope.hint, SynchronizeHint::Asynchronous);
    assert_eq!(*decoded.downcast::<Telemetry>().unwrap(), value);
}

#[test]
fn test_decode_frame_rejections() {
    let registry = registry();

    assert!(matches!(
        decode_frame(&registry, &WsMessage::text("{}")),
        Err(DecodeError::UnexpectedFrame("text"))
    ));

    let unknown = encode_frame("cmd.halt", &true, SynchronizeHint::None).unwrap();
    assert!(matches!(
        decode_frame(&registry, &unknown),
        Err(DecodeError::UnknownTopic(RegistrationError::UnknownTopic(_)))
    ));

    let wrong_type = encode_frame("cmd.start", &42u8, SynchronizeHint::None).unwrap();
    assert!(matches!(
        decode_frame(&registry, &wrong_type),
        Err(DecodeError::Payload { ref topic, .. }) if topic == "cmd.start"
    ));
}

#[test]
fn test_control_frames_are_ignored() {
    let registry = registry();
    let ping = WsMessage::Ping(Default::default());
    assert!(decode_frame(&registry, &ping).unwrap().is_none());
}

#[test]
fn test_link_set_broadcast_except_origin() {
    let links = LinkSet::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let (tx_c, mut rx_c) = mpsc::unbounded_channel();
    let a = Link::new(tx_a, None);
    let origin = a.id;

    assert_eq!(links.insert(a), 1);
    assert_eq!(links.insert(Link::new(tx_b, None)), 2);
    assert_eq!(links.insert(Link::new(tx_c, None)), 3);

    let msg = WsMessage::binary(vec![1u8, 2, 3]);
    assert_eq!(links.broadcast_except(&origin, &msg), 2);

    assert!(rx_a.try_recv().is_err());
    assert_eq!(rx_b.try_recv().unwrap(), msg);
    assert_eq!(rx_c.try_recv().unwrap(), msg);
}

#[test]
fn test_link_set_skips_dead_links() {
    let links = LinkSet::new();
    let (tx_live, mut rx_live) = mpsc::unbounded_channel();
    let (tx_dead, rx_dead) = mpsc::unbounded_channel();
    drop(rx_dead);

    let dead = Link::new(tx_dead, None);
    let dead_id = dead.id;
    links.insert(Link::new(tx_live, None));
    links.insert(dead);

    assert_eq!(links.broadcast(&WsMessage::binary(vec![0u8])), 1);
    assert!(rx_live.try_recv().is_ok());

    assert_eq!(links.remove(&dead_id), Some(1));
    assert_eq!(links.remove(&dead_id), None);
    assert!(!links.contains(&dead_id));
}

#[test]
fn test_reconnect_policy_backoff() {
    let policy = ReconnectPolicy::new(
        Duration::from_secs(2),
        Duration::from_millis(50),
        Duration::from_millis(300),
    );

    assert_eq!(policy.connect_timeout(), Duration::from_secs(2));
    assert_eq!(policy.delay(0), Duration::from_millis(50));
    assert_eq!(policy.delay(1), Duration::from_millis(100));
    assert_eq!(policy.delay(2), Duration::from_millis(200));
    assert_eq!(policy.delay(3), Duration::from_millis(300));
    assert_eq!(policy.delay(40), Duration::from_millis(300));
    assert_eq!(policy.delay(u32::MAX), Duration::from_millis(300));
}

#[test]
fn test_reconnect_policy_clamps_degenerate_values() {
    let policy = ReconnectPolicy::new(Duration::from_secs(1), Duration::ZERO, Duration::ZERO);
    assert_eq!(policy.delay(0), Duration::from_millis(1));
    assert_eq!(policy.delay(5), Duration::from_millis(1));
}

fn channel_handlers() -> (
    InboundHandler,
    mpsc::UnboundedReceiver<Inbound>,
    StateHandler,
    mpsc::UnboundedReceiver<bool>,
) {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = mpsc::unbounded_channel();
    let on_message: InboundHandler = Arc::new(move |inbound| {
        let _ = msg_tx.send(inbound);
    });
    let on_state: StateHandler = Arc::new(move |connected| {
        let _ = state_tx.send(connected);
    });
    (on_message, msg_rx, on_state, state_rx)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

#[tokio::test]
async fn test_managers_exchange_frames() {
    let registry = registry();

    let (server_msg, mut server_inbox, server_state, mut server_states) = channel_handlers();
    let server = ServerConnectionManager::new(registry.clone(), LinkSet::new(), server_msg, server_state);
    let addr = server.start("127.0.0.1:0").unwrap();
    assert_eq!(server.start("127.0.0.1:0").unwrap(), addr);

    let (client_msg, mut client_inbox, client_state, mut client_states) = channel_handlers();
    let client = ClientConnectionManager::new(
        registry,
        format!("ws://{addr}"),
        ReconnectPolicy::default(),
        client_msg,
        client_state,
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.connect().unwrap();

    assert!(next(&mut client_states).await);
    assert!(next(&mut server_states).await);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(server.client_count(), 1);

    assert!(client.send(encode_frame("cmd.start", &true, SynchronizeHint::None).unwrap()));
    let inbound = next(&mut server_inbox).await;
    assert_eq!(inbound.topic, "cmd.start");
    assert!(server.links().contains(&inbound.from));
    assert!(*inbound.value.downcast::<bool>().unwrap());

    let frame = encode_frame("cmd.start", &false, SynchronizeHint::Synchronous).unwrap();
    assert_eq!(server.broadcast(&frame), 1);
    let inbound = next(&mut client_inbox).await;
    assert_eq!(inbound.hint, SynchronizeHint::Synchronous);
    assert!(!*inbound.value.downcast::<bool>().unwrap());

    client.disconnect();
    // the link is released synchronously
    assert!(!client.send(frame));
    assert!(!next(&mut client_states).await);
    assert!(!next(&mut server_states).await);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_server_stop_closes_links() {
    let registry = registry();
    let (server_msg, _server_inbox, server_state, _server_states) = channel_handlers();
    let server = ServerConnectionManager::new(registry.clone(), LinkSet::new(), server_msg, server_state);
    let addr = server.start("127.0.0.1:0").unwrap();

    let (client_msg, _client_inbox, client_state, mut client_states) = channel_handlers();
    let client = ClientConnectionManager::new(
        registry,
        format!("ws://{addr}"),
        ReconnectPolicy::new(
            Duration::from_secs(1),
            Duration::from_millis(20),
            Duration::from_millis(100),
        ),
        client_msg,
        client_state,
    );
    client.connect().unwrap();
    assert!(next(&mut client_states).await);

    server.stop();
    assert!(server.local_addr().is_none());
    assert!(!next(&mut client_states).await);

    // nothing to reconnect to, so the client keeps cycling through retries
    sleep(Duration::from_millis(150)).await;
    assert_ne!(client.state(), ConnectionState::Connected);
    assert_eq!(server.client_count(), 0);
}

#[tokio::test]
async fn test_server_state_events_alternate_under_churn() {
    let registry = registry();
    let (server_msg, _server_inbox, server_state, mut server_states) = channel_handlers();
    let server = ServerConnectionManager::new(registry, LinkSet::new(), server_msg, server_state);
    let addr = server.start("127.0.0.1:0").unwrap();
    let url = format!("ws://{addr}");

    // connect and drop at once, several at a time
    for _ in 0..5 {
        let mut pending = Vec::new();
        for _ in 0..4 {
            pending.push(tokio::spawn(tokio_tungstenite::connect_async(url.clone())));
        }
        for handle in pending {
            let (ws, _) = handle.await.unwrap().unwrap();
            drop(ws);
        }
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.client_count() > 0 && tokio::time::Instant::now() < deadline {
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.client_count(), 0);
    sleep(Duration::from_millis(100)).await;

    let mut events = Vec::new();
    while let Ok(connected) = server_states.try_recv() {
        events.push(connected);
    }
    assert!(!events.is_empty());
    assert_eq!(events.len() % 2, 0, "unbalanced events: {events:?}");
    for (i, connected) in events.iter().enumerate() {
        assert_eq!(*connected, i % 2 == 0, "out of order: {events:?}");
    }
}

#[tokio::test]
async fn test_disconnect_then_connect_reports_in_order() {
    let registry = registry();
    let (server_msg, _server_inbox, server_state, _server_states) = channel_handlers();
    let server = ServerConnectionManager::new(registry.clone(), LinkSet::new(), server_msg, server_state);
    let addr = server.start("127.0.0.1:0").unwrap();

    let (client_msg, _client_inbox, client_state, mut client_states) = channel_handlers();
    let client = ClientConnectionManager::new(
        registry,
        format!("ws://{addr}"),
        ReconnectPolicy::default(),
        client_msg,
        client_state,
    );

    for _ in 0..3 {
        client.connect().unwrap();
        assert!(next(&mut client_states).await);
        client.disconnect();
        client.connect().unwrap();
        assert!(!next(&mut client_states).await);
        assert!(next(&mut client_states).await);
        client.disconnect();
        assert!(!next(&mut client_states).await);
    }

    sleep(Duration::from_millis(100)).await;
    assert!(client_states.try_recv().is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
