//! Public listener
//!
//! Everything except `/router/status` is buffered and handed to the
//! [`Dispatcher`]. Routing failures use the shared error envelope.

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use http_body_util::LengthLimitError;
use serde_json::{Value, json};
use shared::{AppError, ErrorCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::dispatch::{Dispatched, Dispatcher};
use crate::upstream::client::ForwardRequest;

/// Request bodies above this size are rejected before dispatch
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Names the instance that produced a response
pub const UPSTREAM_INSTANCE: HeaderName = HeaderName::from_static("x-upstream-instance");

const FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that describe one connection and are not forwarded
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

#[derive(Clone)]
pub struct RouterState {
    pub dispatcher: Arc<Dispatcher>,
}

pub fn create_router(state: RouterState) -> Router {
    Router::new()
        .route("/router/status", get(router_status))
        .fallback(proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /router/status
async fn router_status(State(state): State<RouterState>) -> Json<Value> {
    let pool = state.dispatcher.pool();
    Json(json!({
        "total": pool.len(),
        "healthy": pool.healthy_count(),
        "instances": pool.status(),
    }))
}

async fn proxy(State(state): State<RouterState>, request: Request) -> Result<Response, AppError> {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES).await.map_err(body_error)?;

    let mut headers = parts.headers;
    strip_connection_headers(&mut headers);
    set_forwarded_for(&mut headers, client_ip.as_deref());

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let dispatched = state
        .dispatcher
        .dispatch(ForwardRequest {
            method: parts.method,
            path_and_query,
            headers,
            body,
        })
        .await?;

    into_response(dispatched)
}

fn into_response(dispatched: Dispatched) -> Result<Response, AppError> {
    let Dispatched {
        response, instance, ..
    } = dispatched;

    let mut headers = response.headers;
    strip_connection_headers(&mut headers);
    // Recomputed from the buffered body
    headers.remove(header::CONTENT_LENGTH);

    let instance = HeaderValue::from_str(&instance)
        .map_err(|e| AppError::internal(format!("Invalid instance name: {e}")))?;
    headers.insert(UPSTREAM_INSTANCE, instance);

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = headers;
    Ok(out)
}

fn body_error(err: axum::Error) -> AppError {
    let too_large = std::error::Error::source(&err).is_some_and(|e| e.is::<LengthLimitError>());
    if too_large {
        AppError::new(ErrorCode::PayloadTooLarge).with_detail("limit_bytes", MAX_BODY_BYTES)
    } else {
        AppError::invalid_request(format!("Request body rejected: {err}"))
    }
}

fn strip_connection_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Replace any client-supplied `X-Forwarded-For` with the peer address.
///
/// Instances key anonymous quota on this header, so only the router may
/// write it.
fn set_forwarded_for(headers: &mut HeaderMap, client_ip: Option<&str>) {
    headers.remove(&FORWARDED_FOR);
    if let Some(value) = client_ip.and_then(|ip| HeaderValue::from_str(ip).ok()) {
        headers.insert(FORWARDED_FOR, value);
    }
}
