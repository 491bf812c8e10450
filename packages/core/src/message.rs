//! The message envelope routed between services.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::id::ServiceId;

/// Classifies the payload of a [`Message`].
///
/// Each variant has a stable one-byte tag. Tags not claimed by a built-in
/// variant decode to [`MessageType::Custom`]; custom tags should start at
/// [`MessageType::CUSTOM_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Runtime-internal notifications.
    System,
    /// Plain text payload.
    Text,
    /// Failure report, usually answering a request whose target was gone.
    Error,
    /// Administrative command (see `Router::runcmd`).
    Control,
    /// Reply correlated to an earlier request by its response id.
    Response,
    /// Application-defined payload kind.
    Custom(u8),
}

impl MessageType {
    /// First tag reserved for application-defined types.
    pub const CUSTOM_BASE: u8 = 16;

    /// Returns `true` for replies and failure reports, which never trigger
    /// further failure replies.
    #[must_use]
    pub const fn is_reply(self) -> bool {
        matches!(self, MessageType::Response | MessageType::Error)
    }
}

impl From<u8> for MessageType {
    fn from(tag: u8) -> Self {
        match tag {
            1 => MessageType::System,
            2 => MessageType::Text,
            3 => MessageType::Error,
            4 => MessageType::Control,
            5 => MessageType::Response,
            other => MessageType::Custom(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(mtype: MessageType) -> Self {
        match mtype {
            MessageType::System => 1,
            MessageType::Text => 2,
            MessageType::Error => 3,
            MessageType::Control => 4,
            MessageType::Response => 5,
            MessageType::Custom(tag) => tag,
        }
    }
}

/// A message travelling through the router.
///
/// The payload is a reference-counted [`Bytes`] buffer, so cloning a message
/// for broadcast does not copy the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Service that sent the message, or [`ServiceId::NONE`] for the router.
    pub sender: ServiceId,
    /// Destination service.
    pub receiver: ServiceId,
    /// Set on copies produced by a broadcast.
    pub broadcast: bool,
    /// Opaque header, interpreted by the receiving service.
    pub header: String,
    /// Opaque body.
    pub payload: Bytes,
    /// Correlation id for request/response exchanges. `0` means "no reply wanted".
    pub response_id: i32,
    /// Payload classification.
    pub mtype: MessageType,
}

impl Message {
    /// Creates an empty message of the given type.
    #[must_use]
    pub fn new(mtype: MessageType) -> Self {
        Self {
            sender: ServiceId::NONE,
            receiver: ServiceId::NONE,
            broadcast: false,
            header: String::new(),
            payload: Bytes::new(),
            response_id: 0,
            mtype,
        }
    }

    /// Creates a text message between two services.
    #[must_use]
    pub fn text(sender: ServiceId, receiver: ServiceId, content: impl Into<String>) -> Self {
        Self::new(MessageType::Text)
            .with_sender(sender)
            .with_receiver(receiver)
            .with_payload(content.into())
    }

    #[must_use]
    pub fn with_sender(mut self, sender: ServiceId) -> Self {
        self.sender = sender;
        self
    }

    #[must_use]
    pub fn with_receiver(mut self, receiver: ServiceId) -> Self {
        self.receiver = receiver;
        self
    }

    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    #[must_use]
    pub fn with_response_id(mut self, response_id: i32) -> Self {
        self.response_id = response_id;
        self
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Whether the sender expects a correlated reply.
    #[must_use]
    pub fn wants_response(&self) -> bool {
        self.response_id != 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
