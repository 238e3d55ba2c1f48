//! In-process fan-out.
//!
//! `Dispatcher` delivers a value to every listener registered on a topic;
//! `StateListeners` does the same for connected/disconnected notifications.
//! Both deliver to a snapshot taken when delivery starts, so listeners may
//! register or unregister (themselves included) from inside a callback.

pub mod dispatcher;
pub mod state;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

pub use dispatcher::{Dispatcher, ListenerHandle};
pub use state::{StateListenerHandle, StateListeners};

/// Runs `f`, turning a panic into a logged error.
pub(crate) fn isolate(context: &str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!("{context}: listener panicked: {}", panic_message(&*payload));
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests;
