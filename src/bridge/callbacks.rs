//! Handler table: one host-side continuation per event kind.
//!
//! Registering a handler for a kind that already has one replaces it; there is
//! no fan-out. Handlers are invoked by the host pump only, never from the
//! native callback thread.

use crate::types::notification::{Notification, ResponseKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered event handler. Receives the notification by value.
pub type Handler = Arc<dyn Fn(Notification) + Send + Sync>;

pub struct HandlerTable {
    handlers: Mutex<HashMap<ResponseKind, Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register `handler` for `kind`. Returns true if a previous handler was replaced.
    pub fn register(&self, kind: ResponseKind, handler: Handler) -> bool {
        self.handlers.lock().insert(kind, handler).is_some()
    }

    pub fn unregister(&self, kind: ResponseKind) -> bool {
        self.handlers.lock().remove(&kind).is_some()
    }

    pub fn has_handler(&self, kind: ResponseKind) -> bool {
        self.handlers.lock().contains_key(&kind)
    }

    /// Invoke the handler for the notification's kind.
    ///
    /// Returns false when no handler is registered; the notification is then
    /// discarded. The lock is released before the handler runs, so a handler
    /// may register or replace handlers itself.
    pub fn dispatch(&self, notification: Notification) -> bool {
        let handler = self.handlers.lock().get(&notification.kind).cloned();
        match handler {
            Some(handler) => {
                handler(notification);
                true
            }
            None => false,
        }
    }

    /// Drop every handler (session closed).
    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}
