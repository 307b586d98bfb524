use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use storefront_common::types::{ChatMessage, Conversation, MessageStatus, UserId};

use super::{MessagePage, MessageQuery, SentMessage, StoreError, StoreResult};

const CONVERSATION_COLUMNS: &str = "id, participant_a_id, participant_b_id, last_message, \
     last_message_at, unread_count_a, unread_count_b, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, content, status, \
     deleted_for_sender, deleted_for_receiver, created_at";

// Matches messages the user in `$2` can still see; a NULL viewer sees everything.
const VISIBLE_TO_VIEWER: &str = "($2::BIGINT IS NULL \
     OR (sender_id = $2 AND NOT deleted_for_sender) \
     OR (receiver_id = $2 AND NOT deleted_for_receiver))";

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    participant_a_id: i64,
    participant_b_id: i64,
    last_message: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
    unread_count_a: i32,
    unread_count_b: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            participant_a_id: row.participant_a_id,
            participant_b_id: row.participant_b_id,
            last_message: row.last_message,
            last_message_at: row.last_message_at,
            unread_count_a: row.unread_count_a,
            unread_count_b: row.unread_count_b,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: String,
    status: String,
    deleted_for_sender: bool,
    deleted_for_receiver: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            status: MessageStatus::from_db_value(&row.status)?,
            deleted_for_sender: row.deleted_for_sender,
            deleted_for_receiver: row.deleted_for_receiver,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConversationWithLatestRow {
    #[sqlx(flatten)]
    conversation: ConversationRow,
    latest_id: Option<i64>,
    latest_sender_id: Option<i64>,
    latest_receiver_id: Option<i64>,
    latest_content: Option<String>,
    latest_status: Option<String>,
    latest_deleted_for_sender: Option<bool>,
    latest_deleted_for_receiver: Option<bool>,
    latest_created_at: Option<DateTime<Utc>>,
}

impl ConversationWithLatestRow {
    fn into_parts(self) -> StoreResult<(Conversation, Option<ChatMessage>)> {
        let conversation_id = self.conversation.id;
        let latest = match (
            self.latest_id,
            self.latest_sender_id,
            self.latest_receiver_id,
            self.latest_content,
            self.latest_status,
            self.latest_created_at,
        ) {
            (
                Some(id),
                Some(sender_id),
                Some(receiver_id),
                Some(content),
                Some(status),
                Some(created_at),
            ) => Some(ChatMessage::try_from(MessageRow {
                id,
                conversation_id,
                sender_id,
                receiver_id,
                content,
                status,
                deleted_for_sender: self.latest_deleted_for_sender.unwrap_or(false),
                deleted_for_receiver: self.latest_deleted_for_receiver.unwrap_or(false),
                created_at,
            })?),
            _ => None,
        };

        Ok((self.conversation.into(), latest))
    }
}

pub(super) async fn find_or_create_conversation(
    pool: &PgPool,
    a: UserId,
    b: UserId,
) -> StoreResult<(Conversation, bool)> {
    let mut conn = pool.acquire().await?;
    find_or_create_conversation_on(&mut conn, a, b).await
}

// Insert-or-ignore then refetch: the unique pair constraint makes concurrent
// first messages converge on one row.
async fn find_or_create_conversation_on(
    conn: &mut PgConnection,
    a: UserId,
    b: UserId,
) -> StoreResult<(Conversation, bool)> {
    let inserted = sqlx::query_as::<_, ConversationRow>(&format!(
        "INSERT INTO conversations (participant_a_id, participant_b_id) \
         VALUES ($1, $2) \
         ON CONFLICT (participant_a_id, participant_b_id) DO NOTHING \
         RETURNING {CONVERSATION_COLUMNS}"
    ))
    .bind(a)
    .bind(b)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = inserted {
        return Ok((row.into(), true));
    }

    let existing = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations \
         WHERE participant_a_id = $1 AND participant_b_id = $2"
    ))
    .bind(a)
    .bind(b)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::NotFound("conversation"))?;

    Ok((existing.into(), false))
}

pub(super) async fn append_message(
    pool: &PgPool,
    conversation_id: i64,
    sender_id: UserId,
    receiver_id: UserId,
    content: &str,
) -> StoreResult<(Conversation, ChatMessage)> {
    let mut tx = pool.begin().await?;
    let result = append_message_on(&mut tx, conversation_id, sender_id, receiver_id, content).await?;
    tx.commit().await?;

    Ok(result)
}

async fn append_message_on(
    conn: &mut PgConnection,
    conversation_id: i64,
    sender_id: UserId,
    receiver_id: UserId,
    content: &str,
) -> StoreResult<(Conversation, ChatMessage)> {
    let conversation: Conversation = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1 FOR UPDATE"
    ))
    .bind(conversation_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::NotFound("conversation"))?
    .into();

    for user_id in [sender_id, receiver_id] {
        if !conversation.has_participant(user_id) {
            return Err(StoreError::NotParticipant { conversation_id, user_id });
        }
    }

    let message = ChatMessage::try_from(
        sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO messages (conversation_id, sender_id, receiver_id, content, status) \
             VALUES ($1, $2, $3, $4, 'sent') \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(conversation_id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .fetch_one(&mut *conn)
        .await?,
    )?;

    let conversation = sqlx::query_as::<_, ConversationRow>(&format!(
        "UPDATE conversations SET \
             last_message = $2, \
             last_message_at = $3, \
             updated_at = $3, \
             unread_count_a = unread_count_a + CASE WHEN participant_a_id = $4 THEN 1 ELSE 0 END, \
             unread_count_b = unread_count_b + CASE WHEN participant_b_id = $4 THEN 1 ELSE 0 END \
         WHERE id = $1 \
         RETURNING {CONVERSATION_COLUMNS}"
    ))
    .bind(conversation_id)
    .bind(&message.content)
    .bind(message.created_at)
    .bind(receiver_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok((conversation.into(), message))
}

pub(super) async fn send_chat_message(
    pool: &PgPool,
    (a, b): (UserId, UserId),
    sender_id: UserId,
    receiver_id: UserId,
    content: &str,
) -> StoreResult<SentMessage> {
    let mut tx = pool.begin().await?;
    let (conversation, conversation_created) =
        find_or_create_conversation_on(&mut tx, a, b).await?;
    let (conversation, message) =
        append_message_on(&mut tx, conversation.id, sender_id, receiver_id, content).await?;
    tx.commit().await?;

    Ok(SentMessage { conversation, message, conversation_created })
}

pub(super) async fn mark_read(
    pool: &PgPool,
    conversation_id: i64,
    reader_id: UserId,
) -> StoreResult<Conversation> {
    let mut tx = pool.begin().await?;

    let conversation: Conversation = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1 FOR UPDATE"
    ))
    .bind(conversation_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(StoreError::NotFound("conversation"))?
    .into();

    if !conversation.has_participant(reader_id) {
        return Err(StoreError::NotParticipant { conversation_id, user_id: reader_id });
    }

    sqlx::query(
        "UPDATE messages SET status = 'read' \
         WHERE conversation_id = $1 AND receiver_id = $2 AND status <> 'read'",
    )
    .bind(conversation_id)
    .bind(reader_id)
    .execute(&mut *tx)
    .await?;

    let conversation = sqlx::query_as::<_, ConversationRow>(&format!(
        "UPDATE conversations SET \
             unread_count_a = CASE WHEN participant_a_id = $2 THEN 0 ELSE unread_count_a END, \
             unread_count_b = CASE WHEN participant_b_id = $2 THEN 0 ELSE unread_count_b END \
         WHERE id = $1 \
         RETURNING {CONVERSATION_COLUMNS}"
    ))
    .bind(conversation_id)
    .bind(reader_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(conversation.into())
}

pub(super) async fn soft_delete_for_user(
    pool: &PgPool,
    (a, b): (UserId, UserId),
    acting_user_id: UserId,
) -> StoreResult<u64> {
    let conversation =
        conversation_between(pool, a, b).await?.ok_or(StoreError::NotFound("conversation"))?;

    let mut tx = pool.begin().await?;
    let sent = sqlx::query(
        "UPDATE messages SET deleted_for_sender = TRUE \
         WHERE conversation_id = $1 AND sender_id = $2 AND NOT deleted_for_sender",
    )
    .bind(conversation.id)
    .bind(acting_user_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    let received = sqlx::query(
        "UPDATE messages SET deleted_for_receiver = TRUE \
         WHERE conversation_id = $1 AND receiver_id = $2 AND NOT deleted_for_receiver",
    )
    .bind(conversation.id)
    .bind(acting_user_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    Ok(sent + received)
}

pub(super) async fn soft_delete_all_for_user(
    pool: &PgPool,
    acting_user_id: UserId,
) -> StoreResult<u64> {
    let mut tx = pool.begin().await?;
    let sent = sqlx::query(
        "UPDATE messages SET deleted_for_sender = TRUE \
         WHERE sender_id = $1 AND NOT deleted_for_sender",
    )
    .bind(acting_user_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    let received = sqlx::query(
        "UPDATE messages SET deleted_for_receiver = TRUE \
         WHERE receiver_id = $1 AND NOT deleted_for_receiver",
    )
    .bind(acting_user_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    Ok(sent + received)
}

pub(super) async fn list_conversations_with_latest(
    pool: &PgPool,
    user_id: UserId,
) -> StoreResult<Vec<(Conversation, Option<ChatMessage>)>> {
    let rows = sqlx::query_as::<_, ConversationWithLatestRow>(
        r#"
        SELECT
            c.id, c.participant_a_id, c.participant_b_id, c.last_message, c.last_message_at,
            c.unread_count_a, c.unread_count_b, c.created_at, c.updated_at,
            m.id AS latest_id,
            m.sender_id AS latest_sender_id,
            m.receiver_id AS latest_receiver_id,
            m.content AS latest_content,
            m.status AS latest_status,
            m.deleted_for_sender AS latest_deleted_for_sender,
            m.deleted_for_receiver AS latest_deleted_for_receiver,
            m.created_at AS latest_created_at
        FROM conversations AS c
        LEFT JOIN LATERAL (
            SELECT id, sender_id, receiver_id, content, status,
                   deleted_for_sender, deleted_for_receiver, created_at
            FROM messages
            WHERE conversation_id = c.id
              AND ((sender_id = $1 AND NOT deleted_for_sender)
                OR (receiver_id = $1 AND NOT deleted_for_receiver))
            ORDER BY created_at DESC, id DESC
            LIMIT 1
        ) AS m ON TRUE
        WHERE c.participant_a_id = $1 OR c.participant_b_id = $1
        ORDER BY c.updated_at DESC, c.id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ConversationWithLatestRow::into_parts).collect()
}

pub(super) async fn conversation_between(
    pool: &PgPool,
    a: UserId,
    b: UserId,
) -> StoreResult<Option<Conversation>> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations \
         WHERE participant_a_id = $1 AND participant_b_id = $2"
    ))
    .bind(a)
    .bind(b)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Conversation::from))
}

pub(super) async fn get_conversation(pool: &PgPool, conversation_id: i64) -> StoreResult<Conversation> {
    sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
    ))
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?
    .map(Conversation::from)
    .ok_or(StoreError::NotFound("conversation"))
}

pub(super) async fn delete_conversation(pool: &PgPool, conversation_id: i64) -> StoreResult<()> {
    let deleted = sqlx::query("DELETE FROM conversations WHERE id = $1")
        .bind(conversation_id)
        .execute(pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(StoreError::NotFound("conversation"));
    }

    Ok(())
}

pub(super) async fn list_messages(
    pool: &PgPool,
    conversation_id: i64,
    viewer: Option<UserId>,
    query: MessageQuery,
) -> StoreResult<MessagePage> {
    get_conversation(pool, conversation_id).await?;

    let total = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND {VISIBLE_TO_VIEWER}"
    ))
    .bind(conversation_id)
    .bind(viewer)
    .fetch_one(pool)
    .await?;

    let rows = match query.limit_offset() {
        None => {
            sqlx::query_as::<_, MessageRow>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE conversation_id = $1 AND {VISIBLE_TO_VIEWER} \
                 ORDER BY created_at ASC, id ASC"
            ))
            .bind(conversation_id)
            .bind(viewer)
            .fetch_all(pool)
            .await?
        }
        Some((limit, offset)) => {
            let mut newest_first = sqlx::query_as::<_, MessageRow>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE conversation_id = $1 AND {VISIBLE_TO_VIEWER} \
                 ORDER BY created_at DESC, id DESC \
                 LIMIT $3 OFFSET $4"
            ))
            .bind(conversation_id)
            .bind(viewer)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
            newest_first.reverse();
            newest_first
        }
    };

    let messages = rows.into_iter().map(ChatMessage::try_from).collect::<StoreResult<Vec<_>>>()?;

    Ok(MessagePage { messages, total, query })
}

pub(super) async fn get_message(pool: &PgPool, message_id: i64) -> StoreResult<ChatMessage> {
    sqlx::query_as::<_, MessageRow>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
        .bind(message_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound("message"))
        .and_then(ChatMessage::try_from)
}

pub(super) async fn update_message_status(
    pool: &PgPool,
    message_id: i64,
    status: MessageStatus,
) -> StoreResult<ChatMessage> {
    let mut tx = pool.begin().await?;

    // Conversation row first, matching the lock order of append and mark_read.
    sqlx::query(
        "SELECT c.id FROM conversations c \
         JOIN messages m ON m.conversation_id = c.id \
         WHERE m.id = $1 FOR UPDATE OF c",
    )
    .bind(message_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(StoreError::NotFound("message"))?;

    let current = ChatMessage::try_from(
        sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 FOR UPDATE"
        ))
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("message"))?,
    )?;
    let next = current.status.transition_to(status)?;

    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "UPDATE messages SET status = $2 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(message_id)
    .bind(next.as_db_value())
    .fetch_one(&mut *tx)
    .await?;

    if current.status != MessageStatus::Read && next == MessageStatus::Read {
        sqlx::query(
            "UPDATE conversations SET \
                 unread_count_a = CASE WHEN participant_a_id = $2 \
                     THEN GREATEST(unread_count_a - 1, 0) ELSE unread_count_a END, \
                 unread_count_b = CASE WHEN participant_b_id = $2 \
                     THEN GREATEST(unread_count_b - 1, 0) ELSE unread_count_b END \
             WHERE id = $1",
        )
        .bind(current.conversation_id)
        .bind(current.receiver_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    ChatMessage::try_from(row)
}

pub(super) async fn delete_message(pool: &PgPool, message_id: i64) -> StoreResult<()> {
    let deleted = sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(message_id)
        .execute(pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(StoreError::NotFound("message"));
    }

    Ok(())
}
