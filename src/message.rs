//! The typed envelope used for all inter-agent communication.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a [`Message`].
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a new random message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::generate()
    }
}

/// The kind of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A request for action from another agent.
    Request,
    /// A response to a request.
    Response,
    /// An informational message that expects no response.
    Notification,
    /// A status update (e.g. task status pushed to a planner).
    Status,
    /// An error notification.
    Error,
}

/// A value carried in a [`Message`]'s context map.
///
/// A tagged union standing in for "whatever the caller's runtime type system
/// allows"; the core never inspects [`ContextValue::Opaque`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// A UTF-8 string.
    String(String),
    /// A 64-bit floating point number.
    Number(f64),
    /// A boolean flag.
    Bool(bool),
    /// An ordered list of values.
    List(Vec<ContextValue>),
    /// A nested string-keyed map.
    Map(HashMap<String, ContextValue>),
    /// A reference the core must never inspect or mutate.
    Opaque(serde_json::Value),
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl ContextValue {
    /// Returns the value as a string slice, if it holds one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// The context map threaded through every [`Message`].
pub type Context = HashMap<String, ContextValue>;

/// The wire-exact shape a [`Message`] must round-trip through:
/// `message_id, sender_id, receiver_id, type, content, context, timestamp,
/// reference_id`, with `type` drawn from the lowercase set `{request,
/// response, notification, status, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// See [`Message::message_id`].
    pub message_id: MessageId,
    /// See [`Message::sender_id`].
    pub sender_id: String,
    /// See [`Message::receiver_id`].
    pub receiver_id: String,
    /// See [`Message::kind`].
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// See [`Message::content`].
    pub content: String,
    /// See [`Message::context`].
    pub context: Context,
    /// See [`Message::timestamp`].
    pub timestamp: DateTime<Utc>,
    /// See [`Message::reference_id`].
    pub reference_id: Option<MessageId>,
}

/// An inter-agent message.
///
/// Invariant: a [`MessageKind::Response`] or [`MessageKind::Error`] message
/// must carry a `reference_id` pointing at the `message_id` of the request
/// it answers; the bus uses it to route the message back to the waiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub message_id: MessageId,
    /// Id of the agent that sent the message.
    pub sender_id: String,
    /// Id of the intended recipient agent.
    pub receiver_id: String,
    /// The kind of message this is.
    pub kind: MessageKind,
    /// Main payload of the message.
    pub content: String,
    /// Auxiliary, string-keyed context.
    pub context: Context,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// For responses/errors: the `message_id` of the request being answered.
    pub reference_id: Option<MessageId>,
}

impl Message {
    /// Builds a new message, stamping `timestamp` and generating a fresh id.
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
        context: Context,
    ) -> Self {
        Self {
            message_id: MessageId::generate(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            kind,
            content: content.into(),
            context,
            timestamp: Utc::now(),
            reference_id: None,
        }
    }

    /// Builds a REQUEST message.
    #[must_use]
    pub fn request(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
        context: Context,
    ) -> Self {
        Self::new(sender_id, receiver_id, MessageKind::Request, content, context)
    }

    /// Builds the response to this message: sender/receiver are swapped and
    /// `reference_id` is set to this message's id, so the sender can
    /// correlate it with the original request.
    #[must_use]
    pub fn create_response(&self, content: impl Into<String>, context: Context) -> Self {
        Self {
            message_id: MessageId::generate(),
            sender_id: self.receiver_id.clone(),
            receiver_id: self.sender_id.clone(),
            kind: MessageKind::Response,
            content: content.into(),
            context,
            timestamp: Utc::now(),
            reference_id: Some(self.message_id),
        }
    }

    /// Builds the error response to this message.
    #[must_use]
    pub fn create_error(&self, content: impl Into<String>, context: Context) -> Self {
        let mut response = self.create_response(content, context);
        response.kind = MessageKind::Error;
        response
    }

    /// Converts this message into its wire envelope.
    #[must_use]
    pub fn to_envelope(&self) -> MessageEnvelope {
        MessageEnvelope {
            message_id: self.message_id,
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            kind: self.kind,
            content: self.content.clone(),
            context: self.context.clone(),
            timestamp: self.timestamp,
            reference_id: self.reference_id,
        }
    }

    /// Parses a message from its wire envelope.
    #[must_use]
    pub fn from_envelope(envelope: MessageEnvelope) -> Self {
        Self {
            message_id: envelope.message_id,
            sender_id: envelope.sender_id,
            receiver_id: envelope.receiver_id,
            kind: envelope.kind,
            content: envelope.content,
            context: envelope.context,
            timestamp: envelope.timestamp,
            reference_id: envelope.reference_id,
        }
    }
}
