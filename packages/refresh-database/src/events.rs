use std::sync::Arc;

use crate::contracts::{DatabaseHandle, EventDispatcher};

/// Detaches a connection's event dispatcher for as long as the guard lives.
///
/// The dispatcher that was attached at construction is re-attached on drop,
/// including when the guarded block returns early with an error or unwinds.
pub struct EventSuspension<'a> {
    handle: &'a dyn DatabaseHandle,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
}

impl<'a> EventSuspension<'a> {
    pub fn new(handle: &'a dyn DatabaseHandle) -> Self {
        let dispatcher = handle.event_dispatcher();
        handle.unset_event_dispatcher();
        Self { handle, dispatcher }
    }
}

impl Drop for EventSuspension<'_> {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            self.handle.set_event_dispatcher(dispatcher);
        }
    }
}
