//! Delivery of classified actions to the host callback.

use crate::event::ClassifiedAction;
use std::panic::{self, AssertUnwindSafe};

/// Boxed host callback.
pub type ActionCallback = Box<dyn FnMut(ClassifiedAction) + Send + 'static>;

/// Holds the optional callback and isolates the dispatch cycle from it.
#[derive(Default)]
pub struct EventSink {
    callback: Option<ActionCallback>,
}

impl EventSink {
    pub fn new(callback: Option<ActionCallback>) -> Self {
        Self { callback }
    }

    pub fn is_registered(&self) -> bool {
        self.callback.is_some()
    }

    /// Hand `action` to the callback.
    ///
    /// Returns `false` if the callback panicked. The panic is logged and
    /// swallowed so the caller can carry on with the next event.
    pub fn deliver(&mut self, action: ClassifiedAction) -> bool {
        let Some(callback) = self.callback.as_mut() else {
            log::trace!("No callback registered, discarding {}", action);
            return true;
        };

        let description = action.to_string();
        match panic::catch_unwind(AssertUnwindSafe(|| callback(action))) {
            Ok(()) => true,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Action callback panicked on {}: {}", description, reason);
                false
            }
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("registered", &self.is_registered())
            .finish()
    }
}
