//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs signed with `JWT_SECRET`; `sub` carries the user id.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use readits_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims the service reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

/// An authenticated user extracted from a bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let secret = state
            .config
            .jwt_secret
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;

        let claims = verify_token(token, secret)?;
        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(Self { user_id })
    }
}

/// Validate `token` against `secret` and return its claims.
///
/// # Errors
///
/// Returns `Unauthorized` for a bad signature, an expired token or malformed claims.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            ApiError::Unauthorized
        })
}

/// Sign a token for `user_id` that expires at `exp`.
///
/// # Errors
///
/// Returns `Internal` if encoding fails.
pub fn issue_token(user_id: &UserId, secret: &str, exp: u64) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAR_FUTURE: u64 = 4_102_444_800;

    #[test]
    fn issued_tokens_verify() {
        let user = UserId::generate();
        let token = issue_token(&user, "secret", FAR_FUTURE).unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, user.to_string());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(&UserId::generate(), "secret", FAR_FUTURE).unwrap();
        assert!(matches!(
            verify_token(&token, "other"),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = issue_token(&UserId::generate(), "secret", 1).unwrap();
        assert!(verify_token(&token, "secret").is_err());
    }
}
