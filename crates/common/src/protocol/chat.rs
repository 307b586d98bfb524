// WebSocket event types for the storefront support chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MessageStatus, Role, UserId};

/// Events a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Announce the identity behind this connection. Must match the bearer token.
    Join { user_id: UserId, role: Role, name: String },

    /// Customer -> support. `receiver_id` defaults to the support admin.
    SendMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
    },

    /// Support -> customer.
    AdminSendMessage { to_user_id: UserId, content: String },

    TypingStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<UserId>,
    },

    TypingStop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<UserId>,
    },
}

impl ClientEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::SendMessage { .. } => "send_message",
            Self::AdminSendMessage { .. } => "admin_send_message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
        }
    }
}

/// Events the relay pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Admin-only: customers known to this relay and where they are connected.
    UsersList { users: Vec<ChatContact> },

    /// A chat message forwarded to a recipient or echoed to its sender.
    ReceiveMessage(ChatPayload),

    TypingStart { user_id: UserId },

    TypingStop { user_id: UserId },

    Error { code: String, message: String, retryable: bool },
}

/// A chat message as seen on the wire.
///
/// `message_id` and `conversation_id` are absent when the message could not
/// be persisted; delivery still happens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_role: Role,
    pub receiver_id: UserId,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// One entry of the admin contact list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatContact {
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
    pub online: bool,
}
