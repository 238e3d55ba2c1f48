//! Payload codec.
//!
//! Payloads are bincode. Floats travel as their IEEE bit patterns, so NaN,
//! infinities and negative zero arrive exactly as submitted. The envelope
//! carries the length of everything else, so the codec output does not need
//! to be self-delimiting.

use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}
