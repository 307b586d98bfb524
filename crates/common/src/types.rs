// Core chat domain types shared by the relay and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storefront user identifier (the account table's surrogate key).
pub type UserId = i64;

/// Maximum number of characters accepted in a single chat message.
pub const MAX_MESSAGE_CHARS: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }

    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("unknown message status '{0}'")]
    Unknown(String),
    #[error("message status cannot move from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

/// Delivery status of a chat message.
///
/// Statuses only move forward: `sent -> delivered -> read`, or straight from
/// `sent` to `read`. Re-applying the current status is accepted as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn from_db_value(value: &str) -> Result<Self, StatusError> {
        match value {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(StatusError::Unknown(other.to_string())),
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        next >= self
    }

    pub fn transition_to(self, next: Self) -> Result<Self, StatusError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StatusError::InvalidTransition { from: self.as_db_value(), to: next.as_db_value() })
        }
    }
}

/// A persisted exchange between exactly two users.
///
/// Participants are stored in canonical order (`participant_a_id <
/// participant_b_id`), so each unordered pair maps to one row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub participant_a_id: UserId,
    pub participant_b_id: UserId,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count_a: i32,
    pub unread_count_b: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participant_a_id == user_id || self.participant_b_id == user_id
    }

    /// The other participant, or `None` when `user_id` is not part of this conversation.
    pub fn counterpart_of(&self, user_id: UserId) -> Option<UserId> {
        if self.participant_a_id == user_id {
            Some(self.participant_b_id)
        } else if self.participant_b_id == user_id {
            Some(self.participant_a_id)
        } else {
            None
        }
    }

    pub fn unread_count_for(&self, user_id: UserId) -> Option<i32> {
        if self.participant_a_id == user_id {
            Some(self.unread_count_a)
        } else if self.participant_b_id == user_id {
            Some(self.unread_count_b)
        } else {
            None
        }
    }
}

/// Orders a pair of user ids the way conversations store them.
pub fn canonical_pair(first: UserId, second: UserId) -> (UserId, UserId) {
    if first <= second {
        (first, second)
    } else {
        (second, first)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub status: MessageStatus,
    pub deleted_for_sender: bool,
    pub deleted_for_receiver: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Whether `user_id` can still see this message after per-party deletes.
    pub fn is_visible_to(&self, user_id: UserId) -> bool {
        (self.sender_id == user_id && !self.deleted_for_sender)
            || (self.receiver_id == user_id && !self.deleted_for_receiver)
    }
}

/// A conversation as listed for one participant, with the newest message
/// that participant can still see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub counterpart_id: UserId,
    pub unread_count: i32,
    pub latest_message: ChatMessage,
}

/// A conversation together with the messages visible to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationThread {
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(a: UserId, b: UserId) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: 1,
            participant_a_id: a,
            participant_b_id: b,
            last_message: None,
            last_message_at: None,
            unread_count_a: 3,
            unread_count_b: 5,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(deleted_for_sender: bool, deleted_for_receiver: bool) -> ChatMessage {
        ChatMessage {
            id: 10,
            conversation_id: 1,
            sender_id: 7,
            receiver_id: 1,
            content: "Hello".to_string(),
            status: MessageStatus::Sent,
            deleted_for_sender,
            deleted_for_receiver,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn canonical_pair_is_order_independent() {
        assert_eq!(canonical_pair(7, 1), (1, 7));
        assert_eq!(canonical_pair(1, 7), (1, 7));
    }

    #[test]
    fn unread_count_follows_participant_slot() {
        let conv = conversation(1, 7);
        assert_eq!(conv.unread_count_for(1), Some(3));
        assert_eq!(conv.unread_count_for(7), Some(5));
        assert_eq!(conv.unread_count_for(9), None);
        assert_eq!(conv.counterpart_of(7), Some(1));
        assert_eq!(conv.counterpart_of(9), None);
    }

    #[test]
    fn visibility_is_per_party() {
        let hidden_for_sender = message(true, false);
        assert!(!hidden_for_sender.is_visible_to(7));
        assert!(hidden_for_sender.is_visible_to(1));
        assert!(!hidden_for_sender.is_visible_to(42));

        let hidden_for_receiver = message(false, true);
        assert!(hidden_for_receiver.is_visible_to(7));
        assert!(!hidden_for_receiver.is_visible_to(1));
    }

    #[test]
    fn status_only_moves_forward() {
        assert!(MessageStatus::Sent.can_transition_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.can_transition_to(MessageStatus::Read));
        assert!(MessageStatus::Delivered.can_transition_to(MessageStatus::Read));
        assert!(MessageStatus::Read.can_transition_to(MessageStatus::Read));
        assert!(!MessageStatus::Read.can_transition_to(MessageStatus::Sent));
        assert!(!MessageStatus::Delivered.can_transition_to(MessageStatus::Sent));

        let error = MessageStatus::Read
            .transition_to(MessageStatus::Delivered)
            .expect_err("backwards transition should be rejected");
        assert_eq!(
            error,
            StatusError::InvalidTransition { from: "read", to: "delivered" }
        );
    }

    #[test]
    fn status_db_values_parse_back() {
        for status in [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Read] {
            assert_eq!(MessageStatus::from_db_value(status.as_db_value()), Ok(status));
        }
        assert!(MessageStatus::from_db_value("seen").is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Role::Admin).expect("role should serialize"), "admin");
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("root"), None);
    }
}
