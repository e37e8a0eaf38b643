//! Quota middleware
//!
//! Mounted with `route_layer` so the matched route template is known. On
//! authenticated routes it runs after [`require_auth`](crate::auth::require_auth)
//! and draws from the caller's identity; elsewhere from the origin address.

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use shared::AppError;

use super::{QuotaError, RouteClass, Subject};
use crate::auth::CurrentUser;
use crate::security_log;
use crate::state::AppState;

/// Client address: first `X-Forwarded-For` entry, then the peer address
pub fn extract_ip(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
    {
        // X-Forwarded-For can be comma-separated; first entry is the original client
        if let Some(first) = val.split(',').next() {
            let ip = first.trim();
            if !ip.is_empty() {
                return ip.to_owned();
            }
        }
    }

    // Fallback: peer address from extensions (ConnectInfo)
    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Quota subject: authenticated identity takes precedence over origin
pub fn resolve_subject(request: &Request) -> Subject {
    match request.extensions().get::<CurrentUser>() {
        Some(user) => Subject::Identity(user.username.clone()),
        None => Subject::Origin(extract_ip(request)),
    }
}

pub async fn enforce_quota(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .and_then(|path| RouteClass::classify(request.method(), path.as_str()));
    let Some(route) = route else {
        return Ok(next.run(request).await);
    };

    let subject = resolve_subject(&request);
    match state.quota.admit(&subject, route).await {
        Ok(()) => Ok(next.run(request).await),
        Err(e) => {
            if let QuotaError::Exceeded {
                tier, retry_after, ..
            } = &e
            {
                security_log!(
                    "WARN",
                    "quota_exceeded",
                    subject = subject.to_string(),
                    tier = tier.clone(),
                    retry_after = *retry_after
                );
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;

    #[test]
    fn test_extract_ip_prefers_forwarded_for() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 4000))));
        assert_eq!(extract_ip(&req), "203.0.113.7");
    }

    #[test]
    fn test_extract_ip_falls_back_to_peer() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 9], 4000))));
        assert_eq!(extract_ip(&req), "192.168.1.9");

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_ip(&bare), "unknown");
    }

    #[test]
    fn test_identity_takes_precedence() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            resolve_subject(&req),
            Subject::Origin("203.0.113.7".to_string())
        );

        req.extensions_mut().insert(CurrentUser {
            id: "uid-1".to_string(),
            username: "alice".to_string(),
            jti: "jti-1".to_string(),
            expires_at: 0,
        });
        assert_eq!(resolve_subject(&req), Subject::Identity("alice".to_string()));
    }
}
