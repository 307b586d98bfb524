mod api;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod registry;
mod routing;
mod store;
mod validation;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    auth::jwt::JwtAccessTokenService,
    config::RelayConfig,
    db::pool::{check_pool_health, create_pg_pool, PoolConfig},
    error::{
        attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
        ErrorCode, RelayError,
    },
    registry::{MemorySessionRegistry, SharedSessionRegistry},
    routing::ChatRouter,
    store::ChatStore,
    validation::MAX_REST_BODY_BYTES,
    ws::hub::ConnectionHub,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set STOREFRONT_RELAY_JWT_SECRET in production");
    }

    let jwt_service = Arc::new(
        JwtAccessTokenService::new(&config.jwt_secret).context("invalid relay JWT secret")?,
    );

    let database_url =
        config.database_url.as_deref().context("STOREFRONT_RELAY_DATABASE_URL must be set")?;
    let pool = create_pg_pool(database_url, PoolConfig::from_env(config.db_require_tls))
        .await
        .context("failed to create chat database pool")?;
    check_pool_health(&pool).await.context("chat database health check failed")?;
    db::migrations::run_migrations(&pool).await.context("failed to run chat migrations")?;

    let store = ChatStore::Postgres(pool);
    let registry: SharedSessionRegistry = Arc::new(MemorySessionRegistry::default());
    let chat_router =
        ChatRouter::new(store.clone(), registry, ConnectionHub::default(), config.support_admin_id);

    let app = build_router(&config, jwt_service, store, chat_router);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        support_admin_id = config.support_admin_id,
        "starting chat relay"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_router(
    config: &RelayConfig,
    jwt_service: Arc<JwtAccessTokenService>,
    store: ChatStore,
    chat_router: ChatRouter,
) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(Arc::clone(&jwt_service), chat_router))
            .merge(api::router(
                store,
                jwt_service,
                config.support_admin_id,
                config.expose_internal_errors,
            )),
        config.cors_origins.as_deref(),
    )
}

fn apply_middleware(router: Router, cors_origins: Option<&str>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
        .layer(cors::cors_layer(cors_origins))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(?error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            RelayError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{apply_middleware, build_router};
    use crate::{
        auth::jwt::JwtAccessTokenService,
        config::RelayConfig,
        registry::MemorySessionRegistry,
        routing::ChatRouter,
        store::ChatStore,
        validation::MAX_REST_BODY_BYTES,
        ws::hub::ConnectionHub,
    };

    fn test_router() -> Router {
        let config = RelayConfig::from_env();
        let jwt_service = Arc::new(
            JwtAccessTokenService::new("storefront_test_secret_that_is_definitely_long_enough")
                .expect("test jwt service should initialize"),
        );
        let store = ChatStore::memory();
        let chat_router = ChatRouter::new(
            store.clone(),
            Arc::new(MemorySessionRegistry::default()),
            ConnectionHub::default(),
            1,
        );
        build_router(&config, jwt_service, store, chat_router)
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn caller_request_id_is_echoed() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(
            response.headers().get("x-request-id").and_then(|value| value.to_str().ok()),
            Some("req-42")
        );
    }

    #[tokio::test]
    async fn chat_api_is_mounted_behind_auth() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/users/7/conversations")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_error_body() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)), None);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("panic response body should read");
        let parsed: Value = serde_json::from_slice(&body).expect("panic body should be json");
        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)), None);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
