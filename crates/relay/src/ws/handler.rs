use super::protocol as ws_protocol;
use super::{ChatSocketState, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES};
use crate::auth::{
    jwt::JwtAccessTokenService,
    middleware::{extract_bearer_token, AuthenticatedUser},
};
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    RelayError,
};
use crate::routing::ChatRouter;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use storefront_common::protocol::chat::ServerEvent;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub fn router(jwt_service: Arc<JwtAccessTokenService>, chat_router: ChatRouter) -> Router {
    let state = ChatSocketState { jwt_service, chat_router };

    Router::new().route("/v1/chat/ws", get(ws_upgrade)).with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatSocketQuery {
    access_token: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<ChatSocketState>,
    Query(query): Query<ChatSocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token);
    let Some(token) = header_token.or(query.access_token.as_deref()) else {
        return RelayError::new(ErrorCode::AuthInvalidToken, "missing bearer token").into_response();
    };

    let caller = match state.jwt_service.validate_access_token(token) {
        Ok(identity) => AuthenticatedUser::from(identity),
        Err(_) => {
            return RelayError::new(ErrorCode::AuthInvalidToken, "invalid bearer token")
                .into_response();
        }
    };

    let chat_router = state.chat_router.clone();
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES as usize)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(chat_router, caller, socket)).await;
        })
        .into_response()
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn handle_socket(chat_router: ChatRouter, caller: AuthenticatedUser, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let connection_id = Uuid::new_v4();

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
    chat_router.connect(connection_id, outbound_sender).await;
    debug!(
        connection_id = %connection_id,
        user_id = caller.user_id,
        request_id = %request_id,
        "chat socket opened"
    );

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if no
    // pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset();
    let mut last_pong = Instant::now();
    let heartbeat_timeout =
        std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS + HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(
                        connection_id = %connection_id,
                        request_id = %request_id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if ws_protocol::send_ws_message(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > MAX_FRAME_BYTES as usize {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let reply = match ws_protocol::decode_message(&raw_message) {
                            Ok(event) => chat_router
                                .handle_event(connection_id, caller, event)
                                .await
                                .err()
                                .map(|error| error.to_event()),
                            Err(_) => Some(ws_protocol::error_event(
                                ErrorCode::ValidationFailed,
                                "invalid chat frame payload",
                            )),
                        };

                        if let Some(reply) = reply {
                            if ws_protocol::send_ws_message(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        let reply = ws_protocol::error_event(
                            ErrorCode::ValidationFailed,
                            "chat frames must be JSON text",
                        );
                        if ws_protocol::send_ws_message(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    chat_router.disconnect(connection_id).await;
    info!(connection_id = %connection_id, user_id = caller.user_id, "chat socket closed");
}
