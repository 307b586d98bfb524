pub mod handler;
pub mod hub;
pub mod protocol;

use crate::auth::jwt::JwtAccessTokenService;
use crate::routing::ChatRouter;
use std::sync::Arc;

pub use handler::router;

pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const MAX_FRAME_BYTES: u32 = 262_144;

#[derive(Clone)]
pub struct ChatSocketState {
    jwt_service: Arc<JwtAccessTokenService>,
    chat_router: ChatRouter,
}
