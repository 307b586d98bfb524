// Conversation and message persistence.
//
// Every operation dispatches to a PostgreSQL implementation or to an
// in-memory one used by tests. Both keep the same bookkeeping: one row per
// unordered participant pair, receiver-side unread counters bumped together
// with the message insert, and per-party soft delete flags.

mod memory;
mod postgres;

use std::sync::Arc;

use sqlx::PgPool;
use storefront_common::types::{
    canonical_pair, ChatMessage, Conversation, ConversationSummary, ConversationThread,
    MessageStatus, StatusError, UserId, MAX_MESSAGE_CHARS,
};
use thiserror::Error;
use tokio::sync::RwLock;

pub use memory::MemoryChatStore;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant { conversation_id: i64, user_id: UserId },
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of sending a message between two users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub conversation: Conversation,
    pub message: ChatMessage,
    pub conversation_created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageQuery {
    /// Every message, oldest first.
    All,
    /// The `limit` newest messages after skipping `(page - 1) * limit`,
    /// returned oldest first.
    Page { page: u32, limit: u32 },
}

impl MessageQuery {
    pub fn from_params(all: bool, page: Option<u32>, limit: Option<u32>) -> Self {
        if all || (page.is_none() && limit.is_none()) {
            return Self::All;
        }

        Self::Page { page: page.unwrap_or(1).max(1), limit: normalize_limit(limit) }
    }

    fn limit_offset(self) -> Option<(i64, i64)> {
        match self {
            Self::All => None,
            Self::Page { page, limit } => {
                Some((i64::from(limit), i64::from(page.saturating_sub(1)) * i64::from(limit)))
            }
        }
    }
}

pub fn normalize_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) => DEFAULT_PAGE_SIZE,
        Some(value) => value.min(MAX_PAGE_SIZE),
        None => DEFAULT_PAGE_SIZE,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub total: i64,
    pub query: MessageQuery,
}

#[derive(Clone)]
pub enum ChatStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryChatStore>>),
}

impl ChatStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryChatStore::default())))
    }

    /// Returns the conversation for the unordered pair, creating it when
    /// absent. The flag is true when this call created it.
    pub async fn find_or_create_conversation(
        &self,
        first: UserId,
        second: UserId,
    ) -> StoreResult<(Conversation, bool)> {
        let (a, b) = validate_pair(first, second)?;
        match self {
            Self::Postgres(pool) => postgres::find_or_create_conversation(pool, a, b).await,
            Self::Memory(store) => Ok(store.write().await.find_or_create_conversation(a, b)),
        }
    }

    /// Inserts a `sent` message and updates the preview plus the receiver's
    /// unread counter in one unit.
    pub async fn append_message(
        &self,
        conversation_id: i64,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> StoreResult<(Conversation, ChatMessage)> {
        validate_pair(sender_id, receiver_id)?;
        let content = validate_content(content)?;
        match self {
            Self::Postgres(pool) => {
                postgres::append_message(pool, conversation_id, sender_id, receiver_id, content)
                    .await
            }
            Self::Memory(store) => store.write().await.append_message(
                conversation_id,
                sender_id,
                receiver_id,
                content,
            ),
        }
    }

    /// Find-or-create the pair's conversation and append to it atomically.
    pub async fn send_chat_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> StoreResult<SentMessage> {
        let (a, b) = validate_pair(sender_id, receiver_id)?;
        let content = validate_content(content)?;
        match self {
            Self::Postgres(pool) => {
                postgres::send_chat_message(pool, (a, b), sender_id, receiver_id, content).await
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let (conversation, conversation_created) = guard.find_or_create_conversation(a, b);
                let (conversation, message) =
                    guard.append_message(conversation.id, sender_id, receiver_id, content)?;
                Ok(SentMessage { conversation, message, conversation_created })
            }
        }
    }

    /// Marks every unread message addressed to `reader_id` as read and resets
    /// the reader's counter.
    pub async fn mark_read(&self, conversation_id: i64, reader_id: UserId) -> StoreResult<Conversation> {
        validate_user_id(reader_id)?;
        match self {
            Self::Postgres(pool) => postgres::mark_read(pool, conversation_id, reader_id).await,
            Self::Memory(store) => store.write().await.mark_read(conversation_id, reader_id),
        }
    }

    /// Hides the pair's messages from `acting_user_id` only. Returns the
    /// number of messages whose flag changed.
    pub async fn soft_delete_for_user(
        &self,
        acting_user_id: UserId,
        counterpart_id: UserId,
    ) -> StoreResult<u64> {
        let (a, b) = validate_pair(acting_user_id, counterpart_id)?;
        match self {
            Self::Postgres(pool) => {
                postgres::soft_delete_for_user(pool, (a, b), acting_user_id).await
            }
            Self::Memory(store) => store.write().await.soft_delete_for_user((a, b), acting_user_id),
        }
    }

    /// Hides every message of every conversation from `acting_user_id` only.
    pub async fn soft_delete_all_for_user(&self, acting_user_id: UserId) -> StoreResult<u64> {
        validate_user_id(acting_user_id)?;
        match self {
            Self::Postgres(pool) => postgres::soft_delete_all_for_user(pool, acting_user_id).await,
            Self::Memory(store) => Ok(store.write().await.soft_delete_all_for_user(acting_user_id)),
        }
    }

    /// Conversations of `user_id` that still hold a message visible to them,
    /// most recently updated first.
    pub async fn list_visible_conversations(
        &self,
        user_id: UserId,
    ) -> StoreResult<Vec<ConversationSummary>> {
        validate_user_id(user_id)?;
        let candidates = match self {
            Self::Postgres(pool) => postgres::list_conversations_with_latest(pool, user_id).await?,
            Self::Memory(store) => store.read().await.list_conversations_with_latest(user_id),
        };

        Ok(candidates
            .into_iter()
            .filter_map(|(conversation, latest)| summarize(conversation, latest?, user_id))
            .collect())
    }

    pub async fn conversation_between(
        &self,
        first: UserId,
        second: UserId,
    ) -> StoreResult<Option<Conversation>> {
        let (a, b) = validate_pair(first, second)?;
        match self {
            Self::Postgres(pool) => postgres::conversation_between(pool, a, b).await,
            Self::Memory(store) => Ok(store.read().await.conversation_between(a, b)),
        }
    }

    pub async fn get_conversation(&self, conversation_id: i64) -> StoreResult<Conversation> {
        match self {
            Self::Postgres(pool) => postgres::get_conversation(pool, conversation_id).await,
            Self::Memory(store) => store.read().await.get_conversation(conversation_id),
        }
    }

    /// Hard delete; messages go with it.
    pub async fn delete_conversation(&self, conversation_id: i64) -> StoreResult<()> {
        match self {
            Self::Postgres(pool) => postgres::delete_conversation(pool, conversation_id).await,
            Self::Memory(store) => store.write().await.delete_conversation(conversation_id),
        }
    }

    /// Messages of a conversation. With a `viewer`, messages that viewer has
    /// soft-deleted are left out.
    pub async fn list_messages(
        &self,
        conversation_id: i64,
        viewer: Option<UserId>,
        query: MessageQuery,
    ) -> StoreResult<MessagePage> {
        match self {
            Self::Postgres(pool) => {
                postgres::list_messages(pool, conversation_id, viewer, query).await
            }
            Self::Memory(store) => store.read().await.list_messages(conversation_id, viewer, query),
        }
    }

    /// Admins get every conversation they take part in; customers get their
    /// thread with the support account. Only visible messages are included
    /// and empty threads are dropped.
    pub async fn support_threads(
        &self,
        user_id: UserId,
        is_admin: bool,
        support_admin_id: UserId,
    ) -> StoreResult<Vec<ConversationThread>> {
        validate_user_id(user_id)?;
        let conversations = if is_admin {
            self.list_visible_conversations(user_id)
                .await?
                .into_iter()
                .map(|summary| summary.conversation)
                .collect::<Vec<_>>()
        } else if user_id == support_admin_id {
            Vec::new()
        } else {
            self.conversation_between(user_id, support_admin_id).await?.into_iter().collect()
        };

        let mut threads = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let page = self.list_messages(conversation.id, Some(user_id), MessageQuery::All).await?;
            if !page.messages.is_empty() {
                threads.push(ConversationThread { conversation, messages: page.messages });
            }
        }

        Ok(threads)
    }

    pub async fn get_message(&self, message_id: i64) -> StoreResult<ChatMessage> {
        match self {
            Self::Postgres(pool) => postgres::get_message(pool, message_id).await,
            Self::Memory(store) => store.read().await.get_message(message_id),
        }
    }

    /// Applies a forward-only status change.
    pub async fn update_message_status(
        &self,
        message_id: i64,
        status: MessageStatus,
    ) -> StoreResult<ChatMessage> {
        match self {
            Self::Postgres(pool) => postgres::update_message_status(pool, message_id, status).await,
            Self::Memory(store) => store.write().await.update_message_status(message_id, status),
        }
    }

    pub async fn delete_message(&self, message_id: i64) -> StoreResult<()> {
        match self {
            Self::Postgres(pool) => postgres::delete_message(pool, message_id).await,
            Self::Memory(store) => store.write().await.delete_message(message_id),
        }
    }
}

fn summarize(
    conversation: Conversation,
    latest_message: ChatMessage,
    user_id: UserId,
) -> Option<ConversationSummary> {
    Some(ConversationSummary {
        counterpart_id: conversation.counterpart_of(user_id)?,
        unread_count: conversation.unread_count_for(user_id)?,
        conversation,
        latest_message,
    })
}

fn validate_user_id(user_id: UserId) -> StoreResult<()> {
    if user_id <= 0 {
        return Err(StoreError::validation("user ids must be positive integers"));
    }

    Ok(())
}

fn validate_pair(first: UserId, second: UserId) -> StoreResult<(UserId, UserId)> {
    validate_user_id(first)?;
    validate_user_id(second)?;
    if first == second {
        return Err(StoreError::validation("a conversation needs two distinct users"));
    }

    Ok(canonical_pair(first, second))
}

fn validate_content(content: &str) -> StoreResult<&str> {
    if content.trim().is_empty() {
        return Err(StoreError::validation("message content must not be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(StoreError::validation(format!(
            "message content exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChatStore {
        ChatStore::memory()
    }

    #[tokio::test]
    async fn find_or_create_is_symmetric() {
        let store = store();

        let (forward, created) =
            store.find_or_create_conversation(7, 1).await.expect("conversation should create");
        let (backward, created_again) =
            store.find_or_create_conversation(1, 7).await.expect("conversation should resolve");

        assert!(created);
        assert!(!created_again);
        assert_eq!(forward.id, backward.id);
        assert_eq!((forward.participant_a_id, forward.participant_b_id), (1, 7));
        assert_eq!(forward.unread_count_a, 0);
        assert_eq!(forward.unread_count_b, 0);
    }

    #[tokio::test]
    async fn self_conversation_is_rejected() {
        let error = store()
            .find_or_create_conversation(1, 1)
            .await
            .expect_err("self conversation should be rejected");
        assert!(matches!(error, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn non_positive_ids_are_rejected() {
        let error = store()
            .send_chat_message(0, 1, "hi")
            .await
            .expect_err("zero user id should be rejected");
        assert!(matches!(error, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn append_updates_preview_and_receiver_counter_only() {
        let store = store();
        let (conversation, _) =
            store.find_or_create_conversation(7, 1).await.expect("conversation should create");

        let (updated, message) =
            store.append_message(conversation.id, 7, 1, "hi").await.expect("append should work");

        assert_eq!(updated.last_message.as_deref(), Some("hi"));
        assert_eq!(updated.last_message_at, Some(message.created_at));
        assert_eq!(updated.unread_count_for(1), Some(1));
        assert_eq!(updated.unread_count_for(7), Some(0));
        assert_eq!(message.status, MessageStatus::Sent);
        assert!(!message.deleted_for_sender && !message.deleted_for_receiver);
    }

    #[tokio::test]
    async fn append_rejects_outsiders_and_empty_content() {
        let store = store();
        let (conversation, _) =
            store.find_or_create_conversation(7, 1).await.expect("conversation should create");

        let outsider = store
            .append_message(conversation.id, 9, 1, "hi")
            .await
            .expect_err("outsider should be rejected");
        assert!(matches!(outsider, StoreError::NotParticipant { user_id: 9, .. }));

        let blank = store
            .append_message(conversation.id, 7, 1, "   ")
            .await
            .expect_err("blank content should be rejected");
        assert!(matches!(blank, StoreError::Validation(_)));

        let missing = store
            .append_message(conversation.id + 100, 7, 1, "hi")
            .await
            .expect_err("unknown conversation should be rejected");
        assert!(matches!(missing, StoreError::NotFound("conversation")));
    }

    #[tokio::test]
    async fn customer_to_support_scenario() {
        let store = store();

        let sent = store.send_chat_message(7, 1, "Hello").await.expect("send should succeed");

        assert!(sent.conversation_created);
        assert!(sent.conversation.has_participant(7) && sent.conversation.has_participant(1));
        assert_eq!(sent.conversation.unread_count_for(1), Some(1));
        assert_eq!(sent.conversation.last_message.as_deref(), Some("Hello"));
        assert_eq!(sent.message.sender_id, 7);
        assert_eq!(sent.message.receiver_id, 1);
        assert_eq!(sent.message.status, MessageStatus::Sent);

        let again = store.send_chat_message(1, 7, "Hi there").await.expect("reply should succeed");
        assert!(!again.conversation_created);
        assert_eq!(again.conversation.id, sent.conversation.id);
        assert_eq!(again.conversation.unread_count_for(7), Some(1));
        assert_eq!(again.conversation.unread_count_for(1), Some(1));
    }

    #[tokio::test]
    async fn mark_read_clears_reader_side_only() {
        let store = store();
        store.send_chat_message(7, 1, "one").await.expect("send should succeed");
        store.send_chat_message(7, 1, "two").await.expect("send should succeed");
        let sent = store.send_chat_message(1, 7, "reply").await.expect("send should succeed");

        let conversation =
            store.mark_read(sent.conversation.id, 1).await.expect("mark read should succeed");

        assert_eq!(conversation.unread_count_for(1), Some(0));
        assert_eq!(conversation.unread_count_for(7), Some(1));

        let page = store
            .list_messages(conversation.id, None, MessageQuery::All)
            .await
            .expect("messages should list");
        for message in page.messages {
            if message.receiver_id == 1 {
                assert_eq!(message.status, MessageStatus::Read);
            } else {
                assert_eq!(message.status, MessageStatus::Sent);
            }
        }
    }

    #[tokio::test]
    async fn mark_read_requires_participant() {
        let store = store();
        let sent = store.send_chat_message(7, 1, "hi").await.expect("send should succeed");

        let error =
            store.mark_read(sent.conversation.id, 9).await.expect_err("outsider should fail");
        assert!(matches!(error, StoreError::NotParticipant { .. }));
    }

    #[tokio::test]
    async fn soft_delete_is_one_sided() {
        let store = store();
        store.send_chat_message(7, 1, "hello").await.expect("send should succeed");
        let sent = store.send_chat_message(1, 7, "hi").await.expect("send should succeed");

        let changed = store.soft_delete_for_user(7, 1).await.expect("soft delete should work");
        assert_eq!(changed, 2);

        assert!(store
            .list_visible_conversations(7)
            .await
            .expect("listing should work")
            .is_empty());

        let admin_view = store.list_visible_conversations(1).await.expect("listing should work");
        assert_eq!(admin_view.len(), 1);
        assert_eq!(admin_view[0].conversation.id, sent.conversation.id);
        assert_eq!(admin_view[0].latest_message.content, "hi");

        let admin_messages = store
            .list_messages(sent.conversation.id, Some(1), MessageQuery::All)
            .await
            .expect("messages should list");
        assert_eq!(admin_messages.messages.len(), 2);

        let again = store.soft_delete_for_user(7, 1).await.expect("repeat should work");
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn soft_delete_without_conversation_is_not_found() {
        let error = store()
            .soft_delete_for_user(7, 1)
            .await
            .expect_err("missing conversation should fail");
        assert!(matches!(error, StoreError::NotFound("conversation")));
    }

    #[tokio::test]
    async fn soft_delete_all_touches_only_acting_side() {
        let store = store();
        store.send_chat_message(7, 1, "to support").await.expect("send should succeed");
        store.send_chat_message(8, 7, "to seven").await.expect("send should succeed");

        let changed = store.soft_delete_all_for_user(7).await.expect("soft delete should work");
        assert_eq!(changed, 2);

        assert!(store.list_visible_conversations(7).await.expect("listing").is_empty());
        assert_eq!(store.list_visible_conversations(1).await.expect("listing").len(), 1);
        assert_eq!(store.list_visible_conversations(8).await.expect("listing").len(), 1);
    }

    #[tokio::test]
    async fn listing_uses_newest_visible_message_and_recency_order() {
        let store = store();
        store.send_chat_message(7, 1, "older thread").await.expect("send should succeed");
        store.send_chat_message(8, 1, "newer thread").await.expect("send should succeed");

        let listing = store.list_visible_conversations(1).await.expect("listing should work");

        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].counterpart_id, 8);
        assert_eq!(listing[0].latest_message.content, "newer thread");
        assert_eq!(listing[0].unread_count, 1);
        assert_eq!(listing[1].counterpart_id, 7);
    }

    #[tokio::test]
    async fn paginated_messages_return_newest_page_oldest_first() {
        let store = store();
        let mut conversation_id = 0;
        for index in 1..=5 {
            conversation_id = store
                .send_chat_message(7, 1, &format!("m{index}"))
                .await
                .expect("send should succeed")
                .conversation
                .id;
        }

        let first_page = store
            .list_messages(conversation_id, None, MessageQuery::Page { page: 1, limit: 2 })
            .await
            .expect("page should list");
        let contents =
            first_page.messages.iter().map(|message| message.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["m4", "m5"]);
        assert_eq!(first_page.total, 5);

        let third_page = store
            .list_messages(conversation_id, None, MessageQuery::Page { page: 3, limit: 2 })
            .await
            .expect("page should list");
        assert_eq!(third_page.messages.len(), 1);
        assert_eq!(third_page.messages[0].content, "m1");
    }

    #[tokio::test]
    async fn status_updates_are_forward_only() {
        let store = store();
        let sent = store.send_chat_message(7, 1, "hi").await.expect("send should succeed");
        let message_id = sent.message.id;

        let delivered = store
            .update_message_status(message_id, MessageStatus::Delivered)
            .await
            .expect("delivered should apply");
        assert_eq!(delivered.status, MessageStatus::Delivered);
        let read = store
            .update_message_status(message_id, MessageStatus::Read)
            .await
            .expect("read should apply");
        assert_eq!(read.status, MessageStatus::Read);

        let same = store
            .update_message_status(message_id, MessageStatus::Read)
            .await
            .expect("same status should be a no-op");
        assert_eq!(same.status, MessageStatus::Read);

        let error = store
            .update_message_status(message_id, MessageStatus::Sent)
            .await
            .expect_err("backwards transition should fail");
        assert!(matches!(error, StoreError::Status(StatusError::InvalidTransition { .. })));
        assert_eq!(
            store.get_message(message_id).await.expect("message should exist").status,
            MessageStatus::Read
        );
    }

    #[tokio::test]
    async fn reading_a_message_decrements_the_receivers_unread_counter() {
        let store = store();
        let first = store.send_chat_message(7, 1, "one").await.expect("send should succeed");
        let second = store.send_chat_message(7, 1, "two").await.expect("send should succeed");
        let conversation_id = second.conversation.id;
        assert_eq!(second.conversation.unread_count_for(1), Some(2));

        store
            .update_message_status(first.message.id, MessageStatus::Delivered)
            .await
            .expect("delivered should apply");
        let conversation = store.get_conversation(conversation_id).await.expect("conversation");
        assert_eq!(conversation.unread_count_for(1), Some(2));

        store
            .update_message_status(first.message.id, MessageStatus::Read)
            .await
            .expect("read should apply");
        store
            .update_message_status(first.message.id, MessageStatus::Read)
            .await
            .expect("repeated read should be a no-op");
        let conversation = store.get_conversation(conversation_id).await.expect("conversation");
        assert_eq!(conversation.unread_count_for(1), Some(1));
        assert_eq!(conversation.unread_count_for(7), Some(0));

        store.mark_read(conversation_id, 1).await.expect("mark read should succeed");
        store
            .update_message_status(second.message.id, MessageStatus::Read)
            .await
            .expect("read after mark_read should be a no-op");
        let conversation = store.get_conversation(conversation_id).await.expect("conversation");
        assert_eq!(conversation.unread_count_for(1), Some(0));
    }

    #[tokio::test]
    async fn deleting_conversation_cascades_to_messages() {
        let store = store();
        let sent = store.send_chat_message(7, 1, "hi").await.expect("send should succeed");

        store.delete_conversation(sent.conversation.id).await.expect("delete should succeed");

        assert!(matches!(
            store.get_message(sent.message.id).await,
            Err(StoreError::NotFound("message"))
        ));
        assert!(store.conversation_between(1, 7).await.expect("lookup").is_none());
        assert!(matches!(
            store.delete_conversation(sent.conversation.id).await,
            Err(StoreError::NotFound("conversation"))
        ));
    }

    #[tokio::test]
    async fn support_threads_for_customer_and_admin() {
        let store = store();
        store.send_chat_message(7, 1, "help").await.expect("send should succeed");
        store.send_chat_message(8, 1, "help too").await.expect("send should succeed");
        store.send_chat_message(7, 8, "side chat").await.expect("send should succeed");

        let customer = store.support_threads(7, false, 1).await.expect("threads should load");
        assert_eq!(customer.len(), 1);
        assert_eq!(customer[0].messages.len(), 1);
        assert_eq!(customer[0].messages[0].content, "help");

        let admin = store.support_threads(1, true, 1).await.expect("threads should load");
        assert_eq!(admin.len(), 2);

        store.soft_delete_for_user(1, 8).await.expect("soft delete should work");
        let admin = store.support_threads(1, true, 1).await.expect("threads should load");
        assert_eq!(admin.len(), 1);
    }

    #[test]
    fn message_query_defaults() {
        assert_eq!(MessageQuery::from_params(false, None, None), MessageQuery::All);
        assert_eq!(MessageQuery::from_params(true, Some(2), Some(10)), MessageQuery::All);
        assert_eq!(
            MessageQuery::from_params(false, Some(0), None),
            MessageQuery::Page { page: 1, limit: DEFAULT_PAGE_SIZE }
        );
        assert_eq!(
            MessageQuery::from_params(false, None, Some(1_000)),
            MessageQuery::Page { page: 1, limit: MAX_PAGE_SIZE }
        );
    }
}
