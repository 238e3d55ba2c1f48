//! # Messager
//!
//! `messager` is a typed publish/subscribe library. Producers submit values on
//! named topics; every listener registered on that topic receives the value,
//! whether it lives in the same process or behind a WebSocket relay.
//!
//! ## Core Modules
//!
//! - `topic`: topic declaration, categories and the immutable `TopicRegistry`.
//! - `dispatch`: in-process fan-out of values and connection-state changes.
//! - `messager`: the `Messager` trait and its shared-memory, server and client backends.
//! - `transport`: envelope framing and the WebSocket connection managers.
//! - `config`: settings loaded from `config/default` and `MESSAGER__*` variables.
//! - `utils`: error types and logging setup.
//!
//! ```no_run
//! use messager::{Messager, SharedMemoryMessager, TopicRegistry};
//!
//! let mut builder = TopicRegistry::builder();
//! let start = builder.declare_topic::<bool>("cmd.start")?;
//! let messager = SharedMemoryMessager::new(builder.build());
//!
//! messager.add_topic_listener(&start, |go| println!("start: {go}"))?;
//! messager.start()?;
//! messager.submit(&start, true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod dispatch;
pub mod messager;
pub mod topic;
pub mod transport;
pub mod utils;

pub use dispatch::{ListenerHandle, StateListenerHandle};
pub use messager::{ClientMessager, Input, Messager, ServerMessager, SharedMemoryMessager, SynchronizeHint};
pub use topic::{Category, Topic, TopicRegistry, TopicRegistryBuilder};
pub use utils::error::{ConnectionError, DecodeError, MessagerError, RegistrationError};
