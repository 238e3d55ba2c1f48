//! Envelope framing.
//!
//! One envelope travels in one binary WebSocket message:
//!
//! ```text
//! [hint: u8][topic_len: u16 BE][topic: UTF-8 bytes][payload: remaining bytes]
//! ```
//!
//! The payload is whatever `codec::encode` produced for the topic's payload type.

use crate::messager::SynchronizeHint;
use crate::utils::error::DecodeError;

const HEADER_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub hint: SynchronizeHint,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, hint: SynchronizeHint) -> Self {
        Self {
            hint,
            topic: topic.into(),
            payload,
        }
    }

    /// Writes the wire form. Topic names longer than `u16::MAX` bytes cannot be framed.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        let topic_len = u16::try_from(self.topic.len())
            .map_err(|_| DecodeError::MalformedEnvelope("topic name too long"))?;

        let mut out = Vec::with_capacity(HEADER_LEN + self.topic.len() + self.payload.len());
        out.push(self.hint.as_byte());
        out.extend_from_slice(&topic_len.to_be_bytes());
        out.extend_from_slice(self.topic.as_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::MalformedEnvelope("truncated header"));
        }
        let hint = SynchronizeHint::from_byte(bytes[0])
            .ok_or(DecodeError::MalformedEnvelope("unknown synchronize hint"))?;
        let topic_len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;

        let rest = &bytes[HEADER_LEN..];
        if rest.len() < topic_len {
            return Err(DecodeError::MalformedEnvelope("truncated topic name"));
        }
        let (topic, payload) = rest.split_at(topic_len);
        let topic = std::str::from_utf8(topic)
            .map_err(|_| DecodeError::MalformedEnvelope("topic name is not UTF-8"))?;

        Ok(Self {
            hint,
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }
}
