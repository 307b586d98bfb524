use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use storefront_common::types::{
    ChatMessage, Conversation, ConversationSummary, ConversationThread, UserId,
};

use super::{require_act_for, viewer_for, ApiError, ApiState};
use crate::{
    auth::{
        capability::Capability,
        middleware::{require_capability, AuthenticatedUser},
    },
    store::MessageQuery,
    validation::{ValidatedJson, ValidatedQuery},
};

#[derive(Debug, Deserialize)]
struct OpenConversationRequest {
    #[serde(default)]
    user_id: Option<UserId>,
    other_user_id: UserId,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendChatMessageRequest {
    #[serde(default)]
    sender_id: Option<UserId>,
    receiver_id: UserId,
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListMessagesQuery {
    #[serde(default)]
    all: bool,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ConversationEnvelope {
    conversation: Conversation,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ConversationWithMessages {
    conversation: Conversation,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct MessagesPageEnvelope {
    items: Vec<ChatMessage>,
    total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ConversationListEnvelope {
    items: Vec<ConversationSummary>,
}

#[derive(Debug, Serialize)]
struct SupportThreadEnvelope {
    threads: Vec<ConversationThread>,
}

#[derive(Debug, Serialize)]
struct SoftDeleteEnvelope {
    updated: u64,
}

pub(super) fn routes() -> Router<ApiState> {
    let participate = middleware::from_fn_with_state(Capability::ChatParticipate, require_capability);
    let moderate = middleware::from_fn_with_state(Capability::ChatModerate, require_capability);

    Router::new()
        .route("/v1/conversations", post(open_conversation).route_layer(participate.clone()))
        .route(
            "/v1/conversations/messages",
            post(send_chat_message).route_layer(participate.clone()),
        )
        .route(
            "/v1/conversations/between/{user_id}/{other_user_id}",
            get(conversation_between).route_layer(participate.clone()),
        )
        .route(
            "/v1/conversations/{conversation_id}",
            get(get_conversation).route_layer(participate.clone()),
        )
        .route(
            "/v1/conversations/{conversation_id}",
            delete(delete_conversation).route_layer(moderate),
        )
        .route(
            "/v1/conversations/{conversation_id}/messages",
            get(list_messages).route_layer(participate.clone()),
        )
        .route(
            "/v1/conversations/{conversation_id}/read",
            put(mark_read).route_layer(participate.clone()),
        )
        .route(
            "/v1/users/{user_id}/conversations",
            get(list_user_conversations).route_layer(participate.clone()),
        )
        .route(
            "/v1/users/{user_id}/support-thread",
            get(support_thread).route_layer(participate.clone()),
        )
        .route(
            "/v1/users/{user_id}/conversations/{target_user_id}",
            delete(soft_delete_conversation).route_layer(participate.clone()),
        )
        .route(
            "/v1/users/{user_id}/messages",
            delete(soft_delete_all_messages).route_layer(participate),
        )
}

async fn open_conversation(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<OpenConversationRequest>,
) -> Result<(StatusCode, Json<ConversationEnvelope>), ApiError> {
    let user_id = payload.user_id.unwrap_or(user.user_id);
    require_act_for(&user, user_id)?;

    let (conversation, message, created) = match payload.content {
        Some(content) => {
            let sent = state
                .store
                .send_chat_message(user_id, payload.other_user_id, &content)
                .await
                .map_err(|error| state.reject(error))?;
            (sent.conversation, Some(sent.message), sent.conversation_created)
        }
        None => {
            let (conversation, created) = state
                .store
                .find_or_create_conversation(user_id, payload.other_user_id)
                .await
                .map_err(|error| state.reject(error))?;
            (conversation, None, created)
        }
    };

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ConversationEnvelope { conversation, message })))
}

async fn send_chat_message(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<SendChatMessageRequest>,
) -> Result<(StatusCode, Json<ConversationEnvelope>), ApiError> {
    let sender_id = payload.sender_id.unwrap_or(user.user_id);
    require_act_for(&user, sender_id)?;

    let sent = state
        .store
        .send_chat_message(sender_id, payload.receiver_id, &payload.content)
        .await
        .map_err(|error| state.reject(error))?;

    Ok((
        StatusCode::CREATED,
        Json(ConversationEnvelope { conversation: sent.conversation, message: Some(sent.message) }),
    ))
}

async fn conversation_between(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((user_id, other_user_id)): Path<(UserId, UserId)>,
) -> Result<Json<ConversationWithMessages>, ApiError> {
    if !user.can_act_for(user_id) && !user.can_act_for(other_user_id) {
        return Err(ApiError::forbidden("caller may not act for this user"));
    }

    let conversation = state
        .store
        .conversation_between(user_id, other_user_id)
        .await
        .map_err(|error| state.reject(error))?
        .ok_or_else(|| ApiError::not_found("conversation"))?;
    let viewer = viewer_for(&user, &conversation)?;
    let page = state
        .store
        .list_messages(conversation.id, viewer, MessageQuery::All)
        .await
        .map_err(|error| state.reject(error))?;

    Ok(Json(ConversationWithMessages { conversation, messages: page.messages }))
}

async fn get_conversation(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<ConversationEnvelope>, ApiError> {
    let conversation =
        state.store.get_conversation(conversation_id).await.map_err(|error| state.reject(error))?;
    viewer_for(&user, &conversation)?;

    Ok(Json(ConversationEnvelope { conversation, message: None }))
}

async fn delete_conversation(
    State(state): State<ApiState>,
    Path(conversation_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_conversation(conversation_id).await.map_err(|error| state.reject(error))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
    ValidatedQuery(query): ValidatedQuery<ListMessagesQuery>,
) -> Result<Json<MessagesPageEnvelope>, ApiError> {
    let conversation =
        state.store.get_conversation(conversation_id).await.map_err(|error| state.reject(error))?;
    let viewer = viewer_for(&user, &conversation)?;

    let page = state
        .store
        .list_messages(
            conversation_id,
            viewer,
            MessageQuery::from_params(query.all, query.page, query.limit),
        )
        .await
        .map_err(|error| state.reject(error))?;
    let (page_number, limit) = match page.query {
        MessageQuery::All => (None, None),
        MessageQuery::Page { page, limit } => (Some(page), Some(limit)),
    };

    Ok(Json(MessagesPageEnvelope {
        items: page.messages,
        total: page.total,
        page: page_number,
        limit,
    }))
}

async fn mark_read(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<ConversationEnvelope>, ApiError> {
    let conversation = state
        .store
        .mark_read(conversation_id, user.user_id)
        .await
        .map_err(|error| state.reject(error))?;

    Ok(Json(ConversationEnvelope { conversation, message: None }))
}

async fn list_user_conversations(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(user_id): Path<UserId>,
) -> Result<Json<ConversationListEnvelope>, ApiError> {
    require_act_for(&user, user_id)?;

    let items = state
        .store
        .list_visible_conversations(user_id)
        .await
        .map_err(|error| state.reject(error))?;

    Ok(Json(ConversationListEnvelope { items }))
}

async fn support_thread(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(user_id): Path<UserId>,
) -> Result<Json<SupportThreadEnvelope>, ApiError> {
    require_act_for(&user, user_id)?;

    // An admin looking up a customer gets the customer's thread, filtered by
    // the customer's soft-delete flags.
    let is_admin = user_id == user.user_id && user.role.is_admin();
    let threads = state
        .store
        .support_threads(user_id, is_admin, state.support_admin_id)
        .await
        .map_err(|error| state.reject(error))?;

    Ok(Json(SupportThreadEnvelope { threads }))
}

async fn soft_delete_conversation(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((user_id, target_user_id)): Path<(UserId, UserId)>,
) -> Result<Json<SoftDeleteEnvelope>, ApiError> {
    require_act_for(&user, user_id)?;

    let updated = state
        .store
        .soft_delete_for_user(user_id, target_user_id)
        .await
        .map_err(|error| state.reject(error))?;

    Ok(Json(SoftDeleteEnvelope { updated }))
}

async fn soft_delete_all_messages(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(user_id): Path<UserId>,
) -> Result<Json<SoftDeleteEnvelope>, ApiError> {
    require_act_for(&user, user_id)?;

    let updated = state
        .store
        .soft_delete_all_for_user(user_id)
        .await
        .map_err(|error| state.reject(error))?;

    Ok(Json(SoftDeleteEnvelope { updated }))
}
