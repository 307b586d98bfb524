use crate::{
    auth::{
        capability::Capability,
        jwt::{AccessIdentity, JwtAccessTokenService},
    },
    error::{ErrorCode, RelayError},
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use storefront_common::types::{Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn can(&self, capability: Capability) -> bool {
        capability.granted_to(self.role)
    }

    /// Caller is `user_id` or may act on behalf of any user.
    pub fn can_act_for(&self, user_id: UserId) -> bool {
        self.user_id == user_id || self.can(Capability::ChatModerate)
    }
}

impl From<AccessIdentity> for AuthenticatedUser {
    fn from(identity: AccessIdentity) -> Self {
        Self { user_id: identity.user_id, role: identity.role }
    }
}

pub async fn require_bearer_auth(
    State(jwt_service): State<Arc<JwtAccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token,
        None => return unauthorized_response("missing bearer token"),
    };

    let identity = match jwt_service.validate_access_token(token) {
        Ok(identity) => identity,
        Err(_) => return unauthorized_response("invalid bearer token"),
    };

    request.extensions_mut().insert(AuthenticatedUser::from(identity));

    next.run(request).await
}

/// Route layer rejecting callers whose role lacks `capability`.
/// Must run inside [`require_bearer_auth`].
pub async fn require_capability(
    State(capability): State<Capability>,
    request: Request,
    next: Next,
) -> Response {
    let allowed = request
        .extensions()
        .get::<AuthenticatedUser>()
        .is_some_and(|user| user.can(capability));

    if !allowed {
        return RelayError::new(ErrorCode::AuthForbidden, "caller lacks required capability")
            .into_response();
    }

    next.run(request).await
}

pub(crate) fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    RelayError::new(ErrorCode::AuthInvalidToken, message).into_response()
}
