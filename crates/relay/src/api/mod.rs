pub mod conversations;
pub mod messages;

use std::sync::Arc;

use axum::{
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use serde_json::json;
use storefront_common::types::{Conversation, StatusError, UserId};
use tracing::error;

use crate::{
    auth::{
        capability::Capability,
        jwt::JwtAccessTokenService,
        middleware::{require_bearer_auth, AuthenticatedUser},
    },
    error::{ErrorCode, RelayError},
    store::{ChatStore, StoreError},
};

#[derive(Clone)]
pub struct ApiState {
    store: ChatStore,
    support_admin_id: UserId,
    expose_internal_errors: bool,
}

impl ApiState {
    pub fn new(store: ChatStore, support_admin_id: UserId, expose_internal_errors: bool) -> Self {
        Self { store, support_admin_id, expose_internal_errors }
    }

    fn reject(&self, error: StoreError) -> ApiError {
        ApiError::from_store(error, self.expose_internal_errors)
    }
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest { message: String },
    Forbidden { message: &'static str },
    NotFound { message: String },
    Conflict { message: String },
    Internal { cause: String, expose: bool },
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    fn forbidden(message: &'static str) -> Self {
        Self::Forbidden { message }
    }

    fn not_found(what: &str) -> Self {
        Self::NotFound { message: format!("{what} not found") }
    }

    fn from_store(error: StoreError, expose: bool) -> Self {
        match error {
            StoreError::Validation(message) => Self::BadRequest { message },
            StoreError::NotFound(what) => Self::not_found(what),
            StoreError::NotParticipant { .. } => {
                Self::forbidden("caller is not a participant of this conversation")
            }
            StoreError::Status(transition @ StatusError::InvalidTransition { .. }) => {
                Self::Conflict { message: transition.to_string() }
            }
            other => Self::Internal { cause: other.to_string(), expose },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest { message } => {
                RelayError::new(ErrorCode::ValidationFailed, message).into_response()
            }
            Self::Forbidden { message } => {
                RelayError::new(ErrorCode::AuthForbidden, message).into_response()
            }
            Self::NotFound { message } => {
                RelayError::new(ErrorCode::NotFound, message).into_response()
            }
            Self::Conflict { message } => {
                RelayError::new(ErrorCode::InvalidStatusTransition, message).into_response()
            }
            Self::Internal { cause, expose } => {
                error!(error = %cause, "chat api internal error");
                let relay_error = RelayError::from_code(ErrorCode::InternalError);
                if expose {
                    relay_error.with_details(json!({ "cause": cause })).into_response()
                } else {
                    relay_error.into_response()
                }
            }
        }
    }
}

/// Participants read their own view; moderators who are not participants
/// see the conversation unfiltered.
fn viewer_for(
    user: &AuthenticatedUser,
    conversation: &Conversation,
) -> Result<Option<UserId>, ApiError> {
    if conversation.has_participant(user.user_id) {
        return Ok(Some(user.user_id));
    }
    if user.can(Capability::ChatModerate) {
        return Ok(None);
    }

    Err(ApiError::forbidden("caller is not a participant of this conversation"))
}

fn require_act_for(user: &AuthenticatedUser, user_id: UserId) -> Result<(), ApiError> {
    if user.can_act_for(user_id) {
        Ok(())
    } else {
        Err(ApiError::forbidden("caller may not act for this user"))
    }
}

pub fn router(
    store: ChatStore,
    jwt_service: Arc<JwtAccessTokenService>,
    support_admin_id: UserId,
    expose_internal_errors: bool,
) -> Router {
    build_router_with_state(ApiState::new(store, support_admin_id, expose_internal_errors), jwt_service)
}

fn build_router_with_state(state: ApiState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .merge(conversations::routes())
        .merge(messages::routes())
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{build_router_with_state, ApiState};
    use crate::{auth::jwt::JwtAccessTokenService, store::ChatStore};
    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Method, Request},
        response::Response,
        Router,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use storefront_common::types::{Role, UserId};
    use tower::ServiceExt;

    pub(crate) const TEST_SECRET: &str = "storefront_test_secret_that_is_definitely_long_enough";

    pub(crate) struct TestApi {
        pub(crate) router: Router,
        pub(crate) store: ChatStore,
        jwt_service: Arc<JwtAccessTokenService>,
    }

    impl TestApi {
        pub(crate) fn new() -> Self {
            let jwt_service = Arc::new(
                JwtAccessTokenService::new(TEST_SECRET).expect("jwt service should initialize"),
            );
            let store = ChatStore::memory();
            let router =
                build_router_with_state(ApiState::new(store.clone(), 1, false), jwt_service.clone());

            Self { router, store, jwt_service }
        }

        pub(crate) fn token(&self, user_id: UserId, role: Role) -> String {
            self.jwt_service.issue_access_token(user_id, role).expect("token should be issued")
        }

        pub(crate) async fn call(
            &self,
            method: Method,
            uri: &str,
            caller: Option<(UserId, Role)>,
            body: Option<Value>,
        ) -> Response {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some((user_id, role)) = caller {
                builder =
                    builder.header(AUTHORIZATION, format!("Bearer {}", self.token(user_id, role)));
            }
            let body = match body {
                Some(value) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };

            self.router
                .clone()
                .oneshot(builder.body(body).expect("request should build"))
                .await
                .expect("request should return response")
        }
    }

    pub(crate) async fn read_json(response: Response) -> Value {
        let body =
            to_bytes(response.into_body(), usize::MAX).await.expect("response body should read");
        serde_json::from_slice(&body).expect("response body should be valid json")
    }
}
