// Request extractors that reject bad input with structured `RelayError`
// bodies instead of axum's plain-text rejections.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Query, Request,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{ErrorCode, RelayError};

/// Maximum REST request body in bytes (1 MiB).
pub const MAX_REST_BODY_BYTES: usize = 1024 * 1024;

/// JSON body extractor answering malformed payloads with `VALIDATION_FAILED`
/// and oversized ones with `PAYLOAD_TOO_LARGE`.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => Err(json_rejection_error(&rejection).into_response()),
        }
    }
}

/// Query-string counterpart of [`ValidatedJson`].
pub struct ValidatedQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ValidatedQuery(value)),
            Err(rejection) => Err(query_rejection_error(&rejection).into_response()),
        }
    }
}

fn json_rejection_error(rejection: &JsonRejection) -> RelayError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return RelayError::new(
            ErrorCode::PayloadTooLarge,
            format!("request body exceeds limit of {MAX_REST_BODY_BYTES} bytes"),
        );
    }

    let (message, details) = classify_json_rejection(rejection);
    RelayError::new(ErrorCode::ValidationFailed, message).with_details(details)
}

fn classify_json_rejection(rejection: &JsonRejection) -> (String, Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            (format!("invalid JSON payload: {e}"), json!({ "kind": "data_error" }))
        }
        JsonRejection::JsonSyntaxError(e) => {
            (format!("malformed JSON: {e}"), json!({ "kind": "syntax_error" }))
        }
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            json!({ "kind": "missing_content_type" }),
        ),
        JsonRejection::BytesRejection(e) => {
            (format!("request body error: {e}"), json!({ "kind": "body_error" }))
        }
        other => (format!("request body error: {other}"), json!({ "kind": "unknown" })),
    }
}

fn query_rejection_error(rejection: &QueryRejection) -> RelayError {
    RelayError::new(ErrorCode::ValidationFailed, format!("invalid query string: {rejection}"))
        .with_details(json!({ "kind": "query_error" }))
}
