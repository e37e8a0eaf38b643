//! Authentication middleware

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use shared::AppError;

use super::{AuthError, TokenService};
use crate::security_log;
use crate::state::AppState;

/// Bearer token from the `Authorization` header
pub fn bearer_token(req: &Request) -> Result<&str, AuthError> {
    let header = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    TokenService::extract_from_header(header)
        .ok_or_else(|| AuthError::TokenMalformed("invalid authorization header".into()))
}

/// Require a valid session token
///
/// Validates `Authorization: Bearer <token>` through the
/// [`SessionAuthority`](super::SessionAuthority) and injects
/// [`CurrentUser`](super::CurrentUser) into the request extensions.
///
/// | Failure | Code |
/// |---------|------|
/// | no header | `not_authenticated` |
/// | bad signature / structure | `token_malformed` |
/// | past expiry | `token_expired` |
/// | logged out | `token_revoked` |
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let result = match bearer_token(&req) {
        Ok(token) => state.sessions.validate(token).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(user) => {
            req.extensions_mut().insert(user.clone());
            let mut response = next.run(req).await;
            // Visible to the outer logging layer
            response.extensions_mut().insert(user);
            Ok(response)
        }
        Err(e) => {
            if matches!(e, AuthError::MissingToken) {
                security_log!("WARN", "auth_missing", uri = format!("{}", req.uri()));
            } else {
                security_log!(
                    "WARN",
                    "auth_failed",
                    error = format!("{}", e),
                    uri = format!("{}", req.uri())
                );
            }
            Err(e.into())
        }
    }
}
