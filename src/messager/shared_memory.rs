use tracing::info;

use super::{Messager, MessagerCore, SynchronizeHint};
use crate::topic::{Topic, TopicPayload, TopicRegistry};
use crate::utils::error::MessagerError;

/// In-process backend: `submit` runs every listener before returning.
pub struct SharedMemoryMessager {
    core: MessagerCore,
}

impl SharedMemoryMessager {
    pub fn new(registry: TopicRegistry) -> Self {
        Self {
            core: MessagerCore::new(registry),
        }
    }
}

impl Messager for SharedMemoryMessager {
    fn core(&self) -> &MessagerCore {
        &self.core
    }

    fn start(&self) -> Result<(), MessagerError> {
        if self.core.mark_started()? {
            info!("Shared memory messager started");
            self.core.state_listeners().notify(true);
        }
        Ok(())
    }

    fn close(&self) {
        let was_open = self.core.is_open();
        if !self.core.mark_closed() {
            return;
        }
        if was_open {
            self.core.state_listeners().notify(false);
        }
        self.core.clear();
        info!("Shared memory messager closed");
    }

    fn is_connected(&self) -> bool {
        self.core.is_open()
    }

    fn submit_with_hint<T: TopicPayload>(
        &self,
        topic: &Topic<T>,
        value: T,
        hint: SynchronizeHint,
    ) -> Result<(), MessagerError> {
        self.core.dispatch_local(topic, &value, hint)?;
        Ok(())
    }
}
