use axum::extract::ws::{Message, WebSocket};
use storefront_common::protocol::chat::{ClientEvent, ServerEvent};

use crate::error::ErrorCode;

pub fn decode_message(raw: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str::<ClientEvent>(raw)
}

pub fn encode_message(message: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub fn error_event(code: ErrorCode, message: impl Into<String>) -> ServerEvent {
    ServerEvent::Error {
        code: code.as_str().to_string(),
        message: message.into(),
        retryable: code.retryable(),
    }
}

pub async fn send_ws_message(socket: &mut WebSocket, message: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
