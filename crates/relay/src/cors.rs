// CORS configuration for the chat relay.
//
// Allowed origins come from `STOREFRONT_RELAY_CORS_ORIGINS` (comma-separated,
// read through `RelayConfig`). The storefront dev servers are allowed when it
// is unset.

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::REQUEST_ID_HEADER;

/// Origins allowed when no list is configured.
const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Build a [`CorsLayer`] from the configured origin list.
///
/// `"*"` allows any origin without credentials; a list allows exactly those
/// origins; `None` falls back to the dev defaults. Preflights are cached for
/// one hour and `x-request-id` is exposed to the browser.
pub fn cors_layer(configured_origins: Option<&str>) -> CorsLayer {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, request_id.clone()])
        .expose_headers([request_id])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600));

    match configured_origins.map(str::trim) {
        Some("*") => base.allow_origin(AllowOrigin::any()).allow_credentials(false),
        Some(origins) => base.allow_origin(parse_origins(origins)),
        None => base.allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(","))),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect()
}
