use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use storefront_common::types::{Role, UserId};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    role: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessIdentity {
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_access_token(&self, user_id: UserId, role: Role) -> anyhow::Result<String> {
        self.issue_access_token_at(user_id, role, current_unix_timestamp()?)
    }

    fn issue_access_token_at(
        &self,
        user_id: UserId,
        role: Role,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn validate_access_token(&self, token: &str) -> anyhow::Result<AccessIdentity> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        let user_id = claims
            .sub
            .parse::<UserId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| anyhow!("access token subject '{}' is not a user id", claims.sub))?;
        let role = Role::parse(&claims.role)
            .ok_or_else(|| anyhow!("access token role '{}' is not recognized", claims.role))?;

        Ok(AccessIdentity { user_id, role })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
