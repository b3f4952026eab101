//! Message dispatch
//!
//! Routes a decoded [`Message`] to the handler registered for its
//! [`MessageKind`]. Unknown kinds and undecodable packets are dropped without
//! error. Used from a single receive thread, so it carries no locking.

use log::debug;
use msprof_common::{Message, MessageKind};
use std::collections::HashMap;

/// Handles one kind of message
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message);
}

#[derive(Default)]
pub struct MsgDispatcher {
    handlers: HashMap<MessageKind, Box<dyn MessageHandler>>,
}

impl MsgDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`; a later registration for the same kind wins
    pub fn register_message_handler(&mut self, kind: MessageKind, handler: Box<dyn MessageHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            debug!("Replaced handler for {kind:?}");
        }
    }

    /// Invoke the handler for `message` on the calling thread
    ///
    /// `None` stands for a packet that did not decode and is ignored.
    pub fn on_new_message(&self, message: Option<&Message>) {
        let Some(message) = message else {
            return;
        };
        match self.handlers.get(&message.kind()) {
            Some(handler) => handler.handle(message),
            None => debug!("No handler for {:?}, dropping", message.kind()),
        }
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
