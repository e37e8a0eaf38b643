//! Register, login and logout endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use shared::client::{
    LoginRequest, LoginResponse, MessageResponse, RegisterRequest, RegisterResponse,
};
use shared::AppError;

use super::ApiResult;
use crate::auth::{AuthError, CurrentUser, TokenService};
use crate::security_log;
use crate::state::AppState;

/// POST /api/register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let Json(req) = payload?;
    let record = state.sessions.register(&req.username, &req.password).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user_id: record.user_id,
            username: record.username,
        }),
    ))
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(req) = payload?;

    let issued = state
        .sessions
        .login(&req.username, &req.password)
        .await
        .inspect_err(|e| {
            if matches!(e, AuthError::InvalidCredentials) {
                security_log!("WARN", "login_failed", username = req.username.clone());
            }
        })?;

    Ok(Json(LoginResponse {
        access_token: issued.access_token,
        token_type: "Bearer".to_string(),
        user_id: issued.user_id,
        expires_in: issued.expires_in,
    }))
}

/// POST /api/logout
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
) -> ApiResult<MessageResponse> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(TokenService::extract_from_header)
        .ok_or(AuthError::MissingToken)?;

    state.sessions.logout(token).await?;
    security_log!("INFO", "logout", username = user.username.clone());

    Ok(Json(MessageResponse::new("Successfully logged out")))
}
