//! Authentication
//!
//! - [`SessionAuthority`] - register, login, validate, logout
//! - [`TokenService`] - JWT signing and decoding
//! - [`CurrentUser`] - verified identity injected by [`require_auth`]

pub mod middleware;
pub mod password;
pub mod session;
pub mod token;

use axum::extract::FromRequestParts;
use http::request::Parts;
use shared::{AppError, ErrorCode};
use thiserror::Error;

use crate::store::StoreError;

pub use middleware::require_auth;
pub use session::{IssuedToken, SessionAuthority};
pub use token::{Claims, TokenConfig, TokenService};

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("token expired")]
    TokenExpired,

    #[error("token revoked")]
    TokenRevoked,

    #[error("token malformed: {0}")]
    TokenMalformed(String),

    #[error("identity already exists: {0}")]
    DuplicateIdentity(String),

    #[error("missing bearer token")]
    MissingToken,

    #[error("{0}")]
    InvalidInput(String),

    #[error("password too short")]
    PasswordTooShort,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => AppError::new(ErrorCode::InvalidCredentials),
            AuthError::TokenExpired => AppError::new(ErrorCode::TokenExpired),
            AuthError::TokenRevoked => AppError::new(ErrorCode::TokenRevoked),
            AuthError::TokenMalformed(_) => AppError::new(ErrorCode::TokenMalformed),
            AuthError::DuplicateIdentity(name) => {
                AppError::new(ErrorCode::DuplicateIdentity).with_detail("username", name)
            }
            AuthError::MissingToken => AppError::unauthorized(),
            AuthError::InvalidInput(msg) => AppError::validation(msg),
            AuthError::PasswordTooShort => AppError::new(ErrorCode::PasswordTooShort),
            AuthError::Store(e) => e.into(),
            AuthError::Signing(msg) | AuthError::Hashing(msg) => AppError::internal(msg),
        }
    }
}

/// Verified caller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    /// User ID
    pub id: String,
    pub username: String,
    /// Token ID of the presenting token
    pub jti: String,
    /// Token expiry (Unix seconds)
    pub expires_at: i64,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.uid,
            username: claims.sub,
            jti: claims.jti,
            expires_at: claims.exp,
        }
    }
}

/// Available to handlers behind [`require_auth`]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(AppError::unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_auth_errors_map_to_envelope_codes() {
        let cases = [
            (AuthError::InvalidCredentials, ErrorCode::InvalidCredentials),
            (AuthError::TokenExpired, ErrorCode::TokenExpired),
            (AuthError::TokenRevoked, ErrorCode::TokenRevoked),
            (AuthError::TokenMalformed("x".into()), ErrorCode::TokenMalformed),
            (AuthError::MissingToken, ErrorCode::NotAuthenticated),
            (AuthError::PasswordTooShort, ErrorCode::PasswordTooShort),
        ];
        for (err, code) in cases {
            assert_eq!(AppError::from(err).code, code);
        }
    }

    #[test]
    fn test_auth_error_statuses() {
        let revoked: AppError = AuthError::TokenRevoked.into();
        assert_eq!(revoked.http_status(), StatusCode::UNAUTHORIZED);

        let duplicate: AppError = AuthError::DuplicateIdentity("alice".into()).into();
        assert_eq!(duplicate.http_status(), StatusCode::CONFLICT);

        let store: AppError = AuthError::Store(StoreError::Unavailable("down".into())).into();
        assert_eq!(store.http_status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
