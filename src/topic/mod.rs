//! Topics and the registry that declares them.
//!
//! A `Topic<T>` is a cheap, cloneable handle naming a channel whose payloads are
//! always of type `T`. Topics are declared once through a `TopicRegistryBuilder`;
//! the resulting `TopicRegistry` is immutable and is what lets a receiving peer
//! turn a topic name plus bytes back into a typed value.

pub mod category;
pub mod registry;

pub use category::Category;
pub use registry::{Topic, TopicDescriptor, TopicPayload, TopicRegistry, TopicRegistryBuilder};

/// Separator between the segments of a hierarchical topic name.
pub const SEPARATOR: char = '.';
