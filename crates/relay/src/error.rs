use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    AuthInvalidToken,
    AuthForbidden,
    NotFound,
    InvalidStatusTransition,
    PayloadTooLarge,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::AuthInvalidToken => "AUTH_INVALID_TOKEN",
            Self::AuthForbidden => "AUTH_FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::AuthInvalidToken => StatusCode::UNAUTHORIZED,
            Self::AuthForbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidStatusTransition => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::AuthInvalidToken => "invalid authentication token",
            Self::AuthForbidden => "caller lacks required permission",
            Self::NotFound => "requested resource not found",
            Self::InvalidStatusTransition => "message status cannot move backwards",
            Self::PayloadTooLarge => "payload exceeds maximum allowed size",
            Self::InternalError => "internal server error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayError {
    code: ErrorCode,
    message: String,
    details: Value,
}

impl RelayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}) }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let request_id = current_request_id();

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use serde_json::Value;

    use super::{with_request_id_scope, ErrorCode, RelayError, REQUEST_ID_HEADER};

    #[tokio::test]
    async fn relay_error_uses_scoped_request_id() {
        let response = with_request_id_scope("req-scoped-123".to_owned(), async {
            RelayError::from_code(ErrorCode::InternalError).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");

        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(parsed["error"]["retryable"], true);
        assert_eq!(parsed["error"]["request_id"], "req-scoped-123");
        assert_eq!(parsed["error"]["details"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn custom_details_are_preserved() {
        let response = RelayError::new(ErrorCode::ValidationFailed, "bad payload")
            .with_details(serde_json::json!({ "field": "content" }))
            .into_response();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");
        assert_eq!(parsed["error"]["details"]["field"], "content");
    }

    #[tokio::test]
    async fn scoped_request_id_is_echoed_as_header() {
        let response = with_request_id_scope("req-scoped-456".to_owned(), async {
            RelayError::from_code(ErrorCode::AuthForbidden).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).and_then(|value| value.to_str().ok()),
            Some("req-scoped-456")
        );
    }

    #[tokio::test]
    async fn request_id_is_null_outside_a_scope() {
        let response = RelayError::new(ErrorCode::NotFound, "missing").into_response();

        assert!(response.headers().get(REQUEST_ID_HEADER).is_none());
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");
        assert_eq!(parsed["error"]["message"], "missing");
        assert!(parsed["error"]["request_id"].is_null());
    }

    #[test]
    fn only_internal_errors_are_retryable() {
        assert!(ErrorCode::InternalError.retryable());
        assert!(!ErrorCode::InvalidStatusTransition.retryable());
        assert!(!ErrorCode::NotFound.retryable());
        assert_eq!(ErrorCode::InvalidStatusTransition.status(), StatusCode::CONFLICT);
    }
}
