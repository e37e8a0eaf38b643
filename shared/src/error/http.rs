//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // 404 Not Found
            Self::NotFound | Self::OrderNotFound => StatusCode::NOT_FOUND,

            // 405 Method Not Allowed
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,

            // 409 Conflict
            Self::DuplicateIdentity => StatusCode::CONFLICT,

            // 401 Unauthorized
            Self::NotAuthenticated
            | Self::InvalidCredentials
            | Self::TokenExpired
            | Self::TokenMalformed
            | Self::TokenRevoked => StatusCode::UNAUTHORIZED,

            // 413 Payload Too Large
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,

            // 429 Too Many Requests
            Self::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,

            // 503 Service Unavailable (transient errors, client can retry)
            Self::StoreUnavailable | Self::NoHealthyUpstream | Self::UpstreamUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation errors)
            Self::ValidationFailed
            | Self::InvalidRequest
            | Self::PasswordTooShort
            | Self::OrderStatusInvalid => StatusCode::BAD_REQUEST,
        }
    }
}
