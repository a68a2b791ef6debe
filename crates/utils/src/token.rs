//! Bearer tokens.
//!
//! HS256 JWTs carrying `{user_id, exp}`. A missing or malformed
//! `Authorization` header is not an error: it resolves to no token, and a
//! token that fails signature or expiry checks resolves to no payload.
//! Whether an anonymous actor is acceptable is the permission rule's call.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXP_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuthToken {
    pub access_token: String,
}

impl AuthToken {
    /// Extract the token from an `Authorization: Bearer …` header value,
    /// tolerating absence.
    pub fn get(authorization: Option<&str>) -> Option<Self> {
        let header = authorization?;
        let token = header.strip_prefix("Bearer ")?;
        if token.is_empty() {
            return None;
        }
        Some(AuthToken {
            access_token: token.to_string(),
        })
    }

    /// Issue a token for `user_id`, expiring `exp_minutes` from now.
    pub fn generate(
        user_id: &str,
        secret: &str,
        exp_minutes: i64,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        let claims = TokenClaims {
            user_id: user_id.to_string(),
            exp: (Utc::now() + Duration::minutes(exp_minutes)).timestamp(),
        };
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(AuthToken { access_token })
    }

    /// Decode and validate, returning the payload or `None` on any
    /// signature or expiry failure.
    pub fn verify(&self, secret: &str) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        decode::<TokenClaims>(
            &self.access_token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .ok()
    }
}
