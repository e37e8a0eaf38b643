//! Health check endpoint

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::{Value, json};
use shared::AppError;
use shared::util::now_rfc3339;

use crate::state::AppState;

/// GET /api/health
///
/// 503 while the shared stores are unreachable, so the router's prober takes
/// the instance out of rotation.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match check_stores(&state).await {
        Ok((users_count, orders_count)) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": now_rfc3339(),
                "version": env!("CARGO_PKG_VERSION"),
                "instance": state.instance_id.as_ref(),
                "services": {
                    "ledger": "connected",
                    "orders_count": orders_count,
                    "users_count": users_count,
                },
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e.message, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": now_rfc3339(),
                    "instance": state.instance_id.as_ref(),
                    "error": e.message,
                })),
            )
        }
    }
}

/// Ping the ledger, then count users and orders
async fn check_stores(state: &AppState) -> Result<(u64, u64), AppError> {
    state.ledger.ping().await?;
    let users = state.credentials.count().await?;
    let orders = state.orders.count().await?;
    Ok((users, orders))
}
