//! Order endpoints

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use shared::AppError;
use shared::models::{
    OrderCreate, OrderListResponse, OrderQuery, OrderResponse, OrderStats, OrderUpdate,
};

use super::ApiResult;
use crate::auth::CurrentUser;
use crate::state::AppState;

/// GET /api/orders
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<OrderQuery>, QueryRejection>,
) -> ApiResult<OrderListResponse> {
    let Query(query) = query?;
    Ok(Json(state.orders.list(&query).await?))
}

/// POST /api/orders
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<OrderCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let Json(input) = payload?;
    let order = state.orders.create(&user.username, input).await?;

    tracing::info!(order_id = %order.order_id, user = %user.username, "Order created");
    Ok((
        StatusCode::CREATED,
        Json(OrderResponse {
            message: Some("Order created successfully".to_string()),
            order,
        }),
    ))
}

/// GET /api/orders/{order_id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<OrderResponse> {
    let order = state.orders.get(&order_id).await?;
    Ok(Json(OrderResponse {
        message: None,
        order,
    }))
}

/// PUT /api/orders/{order_id}
pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
    payload: Result<Json<OrderUpdate>, JsonRejection>,
) -> ApiResult<OrderResponse> {
    let Json(update) = payload?;
    let order = state.orders.update_status(&order_id, &update.status).await?;

    tracing::info!(
        order_id = %order.order_id,
        status = order.status.as_str(),
        user = %user.username,
        "Order status updated"
    );
    Ok(Json(OrderResponse {
        message: Some("Order updated successfully".to_string()),
        order,
    }))
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<OrderStats> {
    let total_users = state.credentials.count().await?;
    Ok(Json(state.orders.stats(total_users).await?))
}
