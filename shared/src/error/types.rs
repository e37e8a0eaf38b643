//! Error types and the error response envelope

use super::codes::ErrorCode;
use http::{HeaderValue, StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Application error with structured error code and details
///
/// This is the primary error type of the gateway, providing:
/// - Standardized error codes via [`ErrorCode`]
/// - Human-readable messages
/// - Optional structured details for debugging
/// - An optional `Retry-After` hint (seconds) for quota rejections
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    /// The error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (field-level errors, context, etc.)
    pub details: Option<HashMap<String, Value>>,
    /// Seconds the client should wait before retrying
    pub retry_after: Option<u64>,
}

impl AppError {
    /// Create a new error with the default message for the error code
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
            retry_after: None,
        }
    }

    /// Create a new error with a custom message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// Add a detail entry to this error
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Attach a `Retry-After` hint in seconds
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    // ==================== Convenience constructors ====================

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        let r = resource.into();
        Self::with_message(ErrorCode::NotFound, format!("{} not found", r))
            .with_detail("resource", r)
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, msg)
    }

    /// Create a store unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::StoreUnavailable, msg)
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidRequest, msg)
    }

    /// Create a not authenticated error
    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::NotAuthenticated)
    }
}

/// Error envelope returned by every failing endpoint
///
/// - `code`: numeric error code
/// - `kind`: stable snake_case name of the code
/// - `message`: human-readable message
/// - `details`: additional error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Value>>,
}

impl ErrorResponse {
    /// Create an error response from an AppError
    pub fn from_error(err: &AppError) -> Self {
        Self {
            code: err.code.code(),
            kind: err.code.kind().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(err: AppError) -> Self {
        Self {
            code: err.code.code(),
            kind: err.code.kind().to_string(),
            message: err.message,
            details: err.details,
        }
    }
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

// ===== Axum Integration =====

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;

        let status = self.http_status();
        let body = ErrorResponse::from_error(&self);

        // Log system errors
        if matches!(self.code.category(), super::category::ErrorCategory::System) {
            tracing::error!(
                code = %self.code,
                message = %self.message,
                "System error occurred"
            );
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn test_app_error_new() {
        let err = AppError::new(ErrorCode::TokenRevoked);
        assert_eq!(err.code, ErrorCode::TokenRevoked);
        assert_eq!(err.message, "Token has been revoked");
        assert!(err.details.is_none());
        assert!(err.retry_after.is_none());
    }

    #[test]
    fn test_app_error_with_detail() {
        let err = AppError::validation("Missing required fields")
            .with_detail("field", "items")
            .with_detail("reason", "required");

        assert_eq!(err.code, ErrorCode::ValidationFailed);
        let details = err.details.unwrap();
        assert_eq!(details.get("field").unwrap(), "items");
        assert_eq!(details.get("reason").unwrap(), "required");
    }

    #[test]
    fn test_app_error_convenience_constructors() {
        let err = AppError::not_found("Order");
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.message, "Order not found");
        assert!(err.details.as_ref().unwrap().contains_key("resource"));

        assert_eq!(AppError::unauthorized().code, ErrorCode::NotAuthenticated);
        assert_eq!(
            AppError::store_unavailable("down").code,
            ErrorCode::StoreUnavailable
        );
    }

    #[test]
    fn test_error_response_carries_kind() {
        let err = AppError::new(ErrorCode::QuotaExceeded).with_detail("tier", "login");
        let body = ErrorResponse::from_error(&err);
        assert_eq!(body.code, 2001);
        assert_eq!(body.kind, "quota_exceeded");
        assert!(body.details.is_some());

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"kind\":\"quota_exceeded\""));
    }

    #[test]
    fn test_into_response_sets_retry_after() {
        let response = AppError::new(ErrorCode::QuotaExceeded)
            .with_retry_after(42)
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_into_response_without_retry_after() {
        let response = AppError::new(ErrorCode::TokenExpired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
