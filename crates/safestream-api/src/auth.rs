//! Bearer token authentication.
//!
//! Tokens are HS256 JWTs carrying `{id, role, iat, exp}`. The role in the
//! token is informational: authorization uses the role on the stored user.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::RequestPartsExt;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use safestream_models::{User, UserId, UserRole};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Default token lifetime (30 days).
pub const TOKEN_TTL_SECS: i64 = 30 * 24 * 3600;

/// Token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub id: String,
    pub role: UserRole,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// Signing and verification keys for one secret.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a token for `user`.
    pub fn issue(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            id: user.id.as_str().to_string(),
            role: user.role,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
    pub username: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Reject with 403 unless the user's role is one of `allowed`.
    pub fn require_role(&self, allowed: &[UserRole]) -> ApiResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "User role {} is not authorized to access this route",
                self.role.as_str()
            )))
        }
    }
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| ApiError::unauthorized("Not authorized, no token"))?;

        let claims = state.jwt.verify(bearer.token()).map_err(|e| {
            debug!("Token rejected: {}", e);
            ApiError::unauthorized("Not authorized, token failed")
        })?;

        let user = state
            .users
            .find_by_id(&UserId::from(claims.id))
            .await?
            .ok_or_else(|| ApiError::unauthorized("Not authorized, user not found"))?;

        Ok(Self {
            id: user.id,
            username: user.username,
            role: user.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole) -> User {
        User::new("alice", "alice@example.com", role)
    }

    #[test]
    fn test_issue_and_verify() {
        let keys = JwtKeys::new("test-secret");
        let alice = user(UserRole::Editor);

        let token = keys.issue(&alice).unwrap();
        let claims = keys.verify(&token).unwrap();

        assert_eq!(claims.id, alice.id.as_str());
        assert_eq!(claims.role, UserRole::Editor);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = JwtKeys::new("one").issue(&user(UserRole::Viewer)).unwrap();
        assert!(JwtKeys::new("two").verify(&token).is_err());
        assert!(JwtKeys::new("one").verify("not-a-token").is_err());
    }

    #[test]
    fn test_require_role_message() {
        let viewer = AuthUser {
            id: UserId::from("u1"),
            username: "v".to_string(),
            role: UserRole::Viewer,
        };

        let err = viewer
            .require_role(&[UserRole::Editor, UserRole::Admin])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "User role viewer is not authorized to access this route"
        );
        assert!(viewer.require_role(&[UserRole::Viewer]).is_ok());
    }
}
