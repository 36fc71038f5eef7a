//! Request/response correlation: a waiter table keyed by the request's
//! [`MessageId`], resolved when a RESPONSE or ERROR message referencing it
//! arrives.
//!
//! One `oneshot` channel per outstanding request — the natural async-Rust
//! shape for "await exactly one reply".

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::message::{Message, MessageId};

/// Tracks in-flight requests awaiting a correlated response.
#[derive(Default)]
pub struct CorrelationTable {
    waiters: DashMap<MessageId, oneshot::Sender<Message>>,
}

impl CorrelationTable {
    /// Builds an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `request_id`, returning the receiving half.
    /// If a waiter already exists for this id it is replaced — callers must
    /// use fresh [`MessageId`]s per request, which [`Message::request`]
    /// guarantees.
    pub fn register(&self, request_id: MessageId) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_id, tx);
        rx
    }

    /// Resolves the waiter for `message.reference_id`, if one is registered.
    /// Returns `true` if a waiter was found and notified.
    pub fn resolve(&self, message: Message) -> bool {
        let Some(reference_id) = message.reference_id else {
            return false;
        };
        if let Some((_, tx)) = self.waiters.remove(&reference_id) {
            // Ignore send errors: the waiter may have already timed out and
            // dropped its receiver.
            let _ = tx.send(message);
            true
        } else {
            false
        }
    }

    /// Drops the waiter for `request_id` without resolving it, used when a
    /// `send_request` call times out so the table doesn't leak.
    pub fn cancel(&self, request_id: MessageId) {
        self.waiters.remove(&request_id);
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether no requests are currently awaiting a response.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Context;
    use std::collections::HashMap;

    #[tokio::test]
    async fn resolve_delivers_to_registered_waiter() {
        let table = CorrelationTable::new();
        let request = Message::request("a", "b", "hi", HashMap::new());
        let mut rx = table.register(request.message_id);

        let response = request.create_response("hello back", Context::new());
        assert!(table.resolve(response.clone()));

        let received = rx.try_recv().expect("should have a response");
        assert_eq!(received.message_id, response.message_id);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn resolve_without_reference_id_is_a_no_op() {
        let table = CorrelationTable::new();
        let notification = Message::new(
            "a",
            "b",
            crate::message::MessageKind::Notification,
            "fyi",
            HashMap::new(),
        );
        assert!(!table.resolve(notification));
    }

    #[tokio::test]
    async fn cancel_removes_the_waiter() {
        let table = CorrelationTable::new();
        let request = Message::request("a", "b", "hi", HashMap::new());
        table.register(request.message_id);
        table.cancel(request.message_id);
        assert!(table.is_empty());
    }
}
