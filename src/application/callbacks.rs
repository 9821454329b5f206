//! Registry of user callbacks.

use std::sync::{Arc, RwLock};

use crate::ports::{CallbackEvent, UserCallback};

/// Fans committed changes out to registered callbacks.
///
/// Failures are logged and swallowed; the change they report is already
/// durable.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: Arc<RwLock<Vec<Arc<dyn UserCallback>>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: Arc<dyn UserCallback>) {
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(callback);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn UserCallback>> {
        self.callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Delivers each event to every callback, in registration order.
    pub async fn notify(&self, events: Vec<CallbackEvent>) {
        if events.is_empty() {
            return;
        }
        let callbacks = self.snapshot();
        for event in &events {
            for callback in &callbacks {
                if let Err(err) = callback.on_event(event).await {
                    tracing::warn!(
                        callback = callback.name(),
                        kind = event.kind.as_str(),
                        source_event_id = ?event.source_event_id,
                        error = %err,
                        "User callback failed"
                    );
                }
            }
        }
    }
}
