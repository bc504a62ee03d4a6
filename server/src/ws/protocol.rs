//! JSON wire shapes exchanged over the relay socket.
//!
//! Inbound frames are parsed into [`InboundMessage`]; chat frames are never
//! re-encoded, the router forwards the original text so any payload fields
//! beyond `type`/`mode`/`toUserId`/`from` reach recipients untouched.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Nickname used until a join message supplies one.
pub const DEFAULT_NICKNAME: &str = "Anonymous";

/// A parsed inbound frame, dispatched on its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Join(JoinMessage),
    Chat(ChatMessage),
    /// Any other `type`. Ignored by the router.
    #[serde(other)]
    Unrecognized,
}

/// `{type:"join", userId, instanceId, nickname}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub user_id: String,
    pub instance_id: String,
    #[serde(default = "default_nickname")]
    pub nickname: String,
}

/// `{type:"chat", mode, toUserId?, from:{userId, ...}, ...payload}`
///
/// Only the routing fields are decoded; the rest of the payload stays opaque.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub mode: ChatMode,
    #[serde(default)]
    pub to_user_id: Option<String>,
    #[serde(default)]
    pub from: Option<ChatSender>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Broadcast,
    Direct,
    /// Unknown routing mode. Ignored by the router.
    #[serde(other)]
    Other,
}

/// The `from` object of a chat frame. Extra sender fields are ignored here
/// and forwarded as part of the raw frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSender {
    pub user_id: String,
}

fn default_nickname() -> String {
    DEFAULT_NICKNAME.to_string()
}

impl InboundMessage {
    /// Parse one text frame.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let message: InboundMessage = serde_json::from_str(frame)?;

        if let InboundMessage::Chat(chat) = &message {
            if chat.mode == ChatMode::Direct && chat.from.is_none() {
                return Err(ProtocolError::MissingSender);
            }
        }

        Ok(message)
    }
}

impl ChatMessage {
    /// `from.userId`, if the frame carried one.
    pub fn sender_user_id(&self) -> Option<&str> {
        self.from.as_ref().map(|from| from.user_id.as_str())
    }
}

/// One identified connection in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNode {
    pub user_id: String,
    pub instance_id: String,
    pub nickname: String,
}

/// Messages the server originates (chat frames are relayed, not built here).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage<'a> {
    Presence { nodes: &'a [PresenceNode] },
}

impl OutboundMessage<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
