// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The DB pool reads its own sizing variables in db/pool.rs.

use std::net::SocketAddr;

use storefront_common::types::UserId;

const DEV_JWT_SECRET: &str = "storefront_local_development_jwt_secret_32_chars";

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Refuse PostgreSQL connections that do not require TLS.
    pub db_require_tls: bool,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `storefront_relay=debug`).
    pub log_filter: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    /// Account that customer messages are addressed to when no receiver is given.
    pub support_admin_id: UserId,
    /// Echo raw backend errors in `details.cause` of 500 responses.
    pub expose_internal_errors: bool,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `STOREFRONT_RELAY_HOST` | `0.0.0.0` |
    /// | `STOREFRONT_RELAY_PORT` | `8080` |
    /// | `STOREFRONT_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `STOREFRONT_RELAY_DATABASE_URL` | *(none)* |
    /// | `STOREFRONT_RELAY_DB_REQUIRE_TLS` | `true` |
    /// | `STOREFRONT_RELAY_CORS_ORIGINS` | dev origins (see `cors.rs`) |
    /// | `STOREFRONT_RELAY_LOG_FILTER` | `info` |
    /// | `STOREFRONT_RELAY_LOG_JSON` | `false` |
    /// | `STOREFRONT_RELAY_SUPPORT_ADMIN_ID` | `1` |
    /// | `STOREFRONT_RELAY_EXPOSE_INTERNAL_ERRORS` | `false` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("STOREFRONT_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("STOREFRONT_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret =
            env("STOREFRONT_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url = env("STOREFRONT_RELAY_DATABASE_URL").ok();
        let db_require_tls = parse_bool(env("STOREFRONT_RELAY_DB_REQUIRE_TLS").ok(), true);
        let cors_origins = env("STOREFRONT_RELAY_CORS_ORIGINS").ok();

        let log_filter = env("STOREFRONT_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = parse_bool(env("STOREFRONT_RELAY_LOG_JSON").ok(), false);

        let support_admin_id = env("STOREFRONT_RELAY_SUPPORT_ADMIN_ID")
            .ok()
            .and_then(|v| v.parse::<UserId>().ok())
            .filter(|id| *id > 0)
            .unwrap_or(1);

        let expose_internal_errors =
            parse_bool(env("STOREFRONT_RELAY_EXPOSE_INTERNAL_ERRORS").ok(), false);

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            db_require_tls,
            cors_origins,
            log_filter,
            log_json,
            support_admin_id,
            expose_internal_errors,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("TRUE") | Some("yes") => true,
        Some("0") | Some("false") | Some("FALSE") | Some("no") => false,
        _ => default,
    }
}
