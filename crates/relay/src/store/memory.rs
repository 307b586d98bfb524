use std::collections::BTreeMap;

use chrono::Utc;
use storefront_common::types::{ChatMessage, Conversation, MessageStatus, UserId};

use super::{MessagePage, MessageQuery, StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryChatStore {
    next_conversation_id: i64,
    next_message_id: i64,
    conversations: BTreeMap<i64, Conversation>,
    messages: BTreeMap<i64, ChatMessage>,
}

impl MemoryChatStore {
    pub(super) fn find_or_create_conversation(
        &mut self,
        a: UserId,
        b: UserId,
    ) -> (Conversation, bool) {
        if let Some(existing) = self.conversation_between(a, b) {
            return (existing, false);
        }

        self.next_conversation_id += 1;
        let now = Utc::now();
        let conversation = Conversation {
            id: self.next_conversation_id,
            participant_a_id: a,
            participant_b_id: b,
            last_message: None,
            last_message_at: None,
            unread_count_a: 0,
            unread_count_b: 0,
            created_at: now,
            updated_at: now,
        };
        self.conversations.insert(conversation.id, conversation.clone());

        (conversation, true)
    }

    pub(super) fn append_message(
        &mut self,
        conversation_id: i64,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> StoreResult<(Conversation, ChatMessage)> {
        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound("conversation"))?;
        for user_id in [sender_id, receiver_id] {
            if !conversation.has_participant(user_id) {
                return Err(StoreError::NotParticipant { conversation_id, user_id });
            }
        }

        self.next_message_id += 1;
        let message = ChatMessage {
            id: self.next_message_id,
            conversation_id,
            sender_id,
            receiver_id,
            content: content.to_owned(),
            status: MessageStatus::Sent,
            deleted_for_sender: false,
            deleted_for_receiver: false,
            created_at: Utc::now(),
        };

        conversation.last_message = Some(message.content.clone());
        conversation.last_message_at = Some(message.created_at);
        conversation.updated_at = message.created_at;
        if conversation.participant_a_id == receiver_id {
            conversation.unread_count_a += 1;
        } else {
            conversation.unread_count_b += 1;
        }
        let conversation = conversation.clone();

        self.messages.insert(message.id, message.clone());

        Ok((conversation, message))
    }

    pub(super) fn mark_read(
        &mut self,
        conversation_id: i64,
        reader_id: UserId,
    ) -> StoreResult<Conversation> {
        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound("conversation"))?;
        if !conversation.has_participant(reader_id) {
            return Err(StoreError::NotParticipant { conversation_id, user_id: reader_id });
        }

        if conversation.participant_a_id == reader_id {
            conversation.unread_count_a = 0;
        } else {
            conversation.unread_count_b = 0;
        }
        let conversation = conversation.clone();

        for message in self.messages.values_mut() {
            if message.conversation_id == conversation_id
                && message.receiver_id == reader_id
                && message.status != MessageStatus::Read
            {
                message.status = MessageStatus::Read;
            }
        }

        Ok(conversation)
    }

    pub(super) fn soft_delete_for_user(
        &mut self,
        (a, b): (UserId, UserId),
        acting_user_id: UserId,
    ) -> StoreResult<u64> {
        let conversation =
            self.conversation_between(a, b).ok_or(StoreError::NotFound("conversation"))?;

        Ok(hide_for_user(
            self.messages.values_mut().filter(|message| message.conversation_id == conversation.id),
            acting_user_id,
        ))
    }

    pub(super) fn soft_delete_all_for_user(&mut self, acting_user_id: UserId) -> u64 {
        hide_for_user(self.messages.values_mut(), acting_user_id)
    }

    pub(super) fn list_conversations_with_latest(
        &self,
        user_id: UserId,
    ) -> Vec<(Conversation, Option<ChatMessage>)> {
        let mut conversations = self
            .conversations
            .values()
            .filter(|conversation| conversation.has_participant(user_id))
            .cloned()
            .collect::<Vec<_>>();
        conversations.sort_by(|left, right| {
            right.updated_at.cmp(&left.updated_at).then_with(|| right.id.cmp(&left.id))
        });

        conversations
            .into_iter()
            .map(|conversation| {
                let latest = self.ordered_messages(conversation.id, Some(user_id)).pop();
                (conversation, latest)
            })
            .collect()
    }

    pub(super) fn conversation_between(&self, a: UserId, b: UserId) -> Option<Conversation> {
        self.conversations
            .values()
            .find(|conversation| {
                conversation.participant_a_id == a && conversation.participant_b_id == b
            })
            .cloned()
    }

    pub(super) fn get_conversation(&self, conversation_id: i64) -> StoreResult<Conversation> {
        self.conversations.get(&conversation_id).cloned().ok_or(StoreError::NotFound("conversation"))
    }

    pub(super) fn delete_conversation(&mut self, conversation_id: i64) -> StoreResult<()> {
        self.conversations
            .remove(&conversation_id)
            .ok_or(StoreError::NotFound("conversation"))?;
        self.messages.retain(|_, message| message.conversation_id != conversation_id);

        Ok(())
    }

    pub(super) fn list_messages(
        &self,
        conversation_id: i64,
        viewer: Option<UserId>,
        query: MessageQuery,
    ) -> StoreResult<MessagePage> {
        if !self.conversations.contains_key(&conversation_id) {
            return Err(StoreError::NotFound("conversation"));
        }

        let ordered = self.ordered_messages(conversation_id, viewer);
        let total = ordered.len() as i64;
        let messages = match query.limit_offset() {
            None => ordered,
            Some((limit, offset)) => {
                let mut newest_first = ordered
                    .into_iter()
                    .rev()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .collect::<Vec<_>>();
                newest_first.reverse();
                newest_first
            }
        };

        Ok(MessagePage { messages, total, query })
    }

    pub(super) fn get_message(&self, message_id: i64) -> StoreResult<ChatMessage> {
        self.messages.get(&message_id).cloned().ok_or(StoreError::NotFound("message"))
    }

    pub(super) fn update_message_status(
        &mut self,
        message_id: i64,
        status: MessageStatus,
    ) -> StoreResult<ChatMessage> {
        let message = self.messages.get_mut(&message_id).ok_or(StoreError::NotFound("message"))?;
        let previous = message.status;
        message.status = previous.transition_to(status)?;
        let message = message.clone();

        if previous != MessageStatus::Read && message.status == MessageStatus::Read {
            if let Some(conversation) = self.conversations.get_mut(&message.conversation_id) {
                if conversation.participant_a_id == message.receiver_id {
                    conversation.unread_count_a = (conversation.unread_count_a - 1).max(0);
                } else {
                    conversation.unread_count_b = (conversation.unread_count_b - 1).max(0);
                }
            }
        }

        Ok(message)
    }

    pub(super) fn delete_message(&mut self, message_id: i64) -> StoreResult<()> {
        self.messages.remove(&message_id).map(|_| ()).ok_or(StoreError::NotFound("message"))
    }

    fn ordered_messages(&self, conversation_id: i64, viewer: Option<UserId>) -> Vec<ChatMessage> {
        let mut messages = self
            .messages
            .values()
            .filter(|message| message.conversation_id == conversation_id)
            .filter(|message| viewer.map_or(true, |user_id| message.is_visible_to(user_id)))
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        messages
    }
}

fn hide_for_user<'a>(
    messages: impl Iterator<Item = &'a mut ChatMessage>,
    acting_user_id: UserId,
) -> u64 {
    let mut changed = 0;
    for message in messages {
        if message.sender_id == acting_user_id && !message.deleted_for_sender {
            message.deleted_for_sender = true;
            changed += 1;
        }
        if message.receiver_id == acting_user_id && !message.deleted_for_receiver {
            message.deleted_for_receiver = true;
            changed += 1;
        }
    }
    changed
}
