use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use storefront_common::types::{ChatMessage, Conversation, MessageStatus, UserId};

use super::{require_act_for, ApiError, ApiState};
use crate::{
    auth::{
        capability::Capability,
        middleware::{require_capability, AuthenticatedUser},
    },
    validation::ValidatedJson,
};

#[derive(Debug, Deserialize)]
struct AppendMessageRequest {
    conversation_id: i64,
    #[serde(default)]
    sender_id: Option<UserId>,
    receiver_id: UserId,
    content: String,
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: MessageStatus,
}

#[derive(Debug, Serialize)]
struct AppendedMessageEnvelope {
    conversation: Conversation,
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct MessageEnvelope {
    message: ChatMessage,
}

pub(super) fn routes() -> Router<ApiState> {
    let participate = middleware::from_fn_with_state(Capability::ChatParticipate, require_capability);
    let moderate = middleware::from_fn_with_state(Capability::ChatModerate, require_capability);

    Router::new()
        .route("/v1/messages", post(append_message).route_layer(participate.clone()))
        .route("/v1/messages/{message_id}", get(get_message).route_layer(participate.clone()))
        .route("/v1/messages/{message_id}", delete(delete_message).route_layer(moderate))
        .route(
            "/v1/messages/{message_id}/status",
            put(update_message_status).route_layer(participate),
        )
}

async fn append_message(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<AppendMessageRequest>,
) -> Result<(StatusCode, Json<AppendedMessageEnvelope>), ApiError> {
    let sender_id = payload.sender_id.unwrap_or(user.user_id);
    require_act_for(&user, sender_id)?;

    let (conversation, message) = state
        .store
        .append_message(payload.conversation_id, sender_id, payload.receiver_id, &payload.content)
        .await
        .map_err(|error| state.reject(error))?;

    Ok((StatusCode::CREATED, Json(AppendedMessageEnvelope { conversation, message })))
}

async fn get_message(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(message_id): Path<i64>,
) -> Result<Json<MessageEnvelope>, ApiError> {
    let message = state.store.get_message(message_id).await.map_err(|error| state.reject(error))?;

    let is_party = message.sender_id == user.user_id || message.receiver_id == user.user_id;
    if is_party {
        // A party that deleted the message no longer sees it.
        if !message.is_visible_to(user.user_id) {
            return Err(ApiError::not_found("message"));
        }
    } else if !user.can(Capability::ChatModerate) {
        return Err(ApiError::forbidden("caller is not a party to this message"));
    }

    Ok(Json(MessageEnvelope { message }))
}

async fn update_message_status(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(message_id): Path<i64>,
    ValidatedJson(payload): ValidatedJson<UpdateStatusRequest>,
) -> Result<Json<MessageEnvelope>, ApiError> {
    let current = state.store.get_message(message_id).await.map_err(|error| state.reject(error))?;
    if current.receiver_id != user.user_id && !user.can(Capability::ChatModerate) {
        return Err(ApiError::forbidden("only the receiver may update message status"));
    }

    let message = state
        .store
        .update_message_status(message_id, payload.status)
        .await
        .map_err(|error| state.reject(error))?;

    Ok(Json(MessageEnvelope { message }))
}

async fn delete_message(
    State(state): State<ApiState>,
    Path(message_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_message(message_id).await.map_err(|error| state.reject(error))?;

    Ok(StatusCode::NO_CONTENT)
}
