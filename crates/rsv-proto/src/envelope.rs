//! The envelope exchanged on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Action name of the initial key exchange.
pub const ACTION_KEY_EXCHANGE: &str = "KeyExchange";
/// Action name of the unencrypted disconnect notice.
pub const ACTION_DISCONNECT: &str = "Disconnect";
/// Action name carried by dispatch error replies.
pub const ACTION_ERROR: &str = "Error";

/// Envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Request,
    Response,
    Error,
    Notification,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Request => "Request",
            MessageType::Response => "Response",
            MessageType::Error => "Error",
            MessageType::Notification => "Notification",
        };
        f.write_str(s)
    }
}

/// Unit of exchange between client and server.
///
/// `signature` is the base64 signature over the UTF-8 bytes of `data`, made
/// with the sender's private key before any encryption. An empty signature
/// marks an unsigned envelope (handshake and disconnect only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub action: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub sender_id: String,
}

impl Envelope {
    pub fn new(msg_type: MessageType, action: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            msg_type,
            action: action.into(),
            data: data.into(),
            signature: String::new(),
            sender_id: String::new(),
        }
    }

    pub fn request(action: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(MessageType::Request, action, data)
    }

    pub fn response(action: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(MessageType::Response, action, data)
    }

    /// Build an envelope whose `data` is the JSON serialization of `payload`.
    pub fn with_payload<T: Serialize>(
        msg_type: MessageType,
        action: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtoError> {
        Ok(Self::new(msg_type, action, serde_json::to_string(payload)?))
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Case-insensitive action comparison.
    pub fn is_action(&self, action: &str) -> bool {
        self.action.eq_ignore_ascii_case(action)
    }

    /// Decode the `data` field into a typed payload.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtoError> {
        Ok(serde_json::from_str(&self.data)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Operations the relay knows how to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAction {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl ResourceAction {
    pub const ALL: [ResourceAction; 5] = [
        ResourceAction::List,
        ResourceAction::Get,
        ResourceAction::Create,
        ResourceAction::Update,
        ResourceAction::Delete,
    ];

    /// Parse an envelope action, ignoring ASCII case.
    pub fn parse(action: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(action))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceAction::List => "list",
            ResourceAction::Get => "get",
            ResourceAction::Create => "create",
            ResourceAction::Update => "update",
            ResourceAction::Delete => "delete",
        }
    }

    /// Whether the resource path carries the record id.
    pub fn targets_single_record(&self) -> bool {
        matches!(self, ResourceAction::Get | ResourceAction::Update | ResourceAction::Delete)
    }

    /// Whether the payload is forwarded as a request body.
    pub fn has_body(&self) -> bool {
        matches!(self, ResourceAction::Create | ResourceAction::Update)
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
