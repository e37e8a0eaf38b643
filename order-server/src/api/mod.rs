//! HTTP surface of an instance

pub mod auth;
pub mod health;
pub mod orders;

use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use shared::{AppError, ErrorCode};
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::logging::logging_middleware;
use crate::quota::enforce_quota;
use crate::state::AppState;

pub type ApiResult<T> = Result<Json<T>, AppError>;

/// Create the instance router
///
/// Layer order per request: logging, then `require_auth` on protected
/// routes, then quota, then the handler.
pub fn create_router(state: AppState) -> Router {
    let quota = middleware::from_fn_with_state(state.clone(), enforce_quota);

    // Anonymous routes: quota drawn from the origin address
    let public = Router::new()
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .route_layer(quota.clone());

    // Authenticated routes: quota drawn from the identity
    let protected = Router::new()
        .route("/api/logout", post(auth::logout))
        .route("/api/orders", get(orders::list).post(orders::create))
        .route(
            "/api/orders/{order_id}",
            get(orders::get_order).put(orders::update),
        )
        .route("/api/stats", get(orders::stats))
        .route_layer(quota)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/api/health", get(health::health_check))
        .merge(public)
        .merge(protected)
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::with_message(ErrorCode::NotFound, "Endpoint not found")
}

async fn method_not_allowed() -> AppError {
    AppError::new(ErrorCode::MethodNotAllowed)
}
