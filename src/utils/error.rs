//! Error types for the messager.
//!
//! Errors are grouped by when they happen:
//! - `RegistrationError`: building or querying the topic registry (startup time)
//! - `DecodeError`: an inbound frame that cannot be turned into a typed value
//! - `ConnectionError`: binding, connecting or handshaking a network link
//! - `MessagerError`: what the public `Messager` API returns to callers

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("topic '{0}' is already registered")]
    DuplicateTopic(String),

    #[error("topic '{0}' is not registered")]
    UnknownTopic(String),

    #[error("invalid topic name '{0}'")]
    InvalidTopicName(String),

    #[error("topic '{topic}' carries {expected}, not {requested}")]
    TypeMismatch {
        topic: String,
        expected: &'static str,
        requested: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),

    #[error(transparent)]
    UnknownTopic(#[from] RegistrationError),

    #[error("payload for topic '{topic}' does not decode: {source}")]
    Payload {
        topic: String,
        #[source]
        source: bincode::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect failed: {0}")]
    Connect(#[from] tungstenite::Error),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("no tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Debug, Error)]
pub enum MessagerError {
    #[error("messager is not open")]
    Closed,

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] bincode::Error),

    #[error("failed to frame envelope: {0}")]
    Frame(#[from] DecodeError),
}
