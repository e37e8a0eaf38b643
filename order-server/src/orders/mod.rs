//! Order book
//!
//! Validation, paging and error mapping over the shared [`OrderStore`], so
//! every instance sees the same orders and draws from one id sequence.

use shared::models::{
    Order, OrderCreate, OrderListResponse, OrderQuery, OrderStats, OrderStatus, Pagination,
};
use shared::util::now_rfc3339;
use shared::{AppError, ErrorCode};
use std::sync::Arc;

use crate::store::{OrderFilter, OrderStore, order_id_for};

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Clone)]
pub struct OrderBook {
    store: Arc<dyn OrderStore>,
}

impl OrderBook {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn count(&self) -> Result<u64, AppError> {
        Ok(self.store.count().await?)
    }

    /// Validate and store a new order
    pub async fn create(&self, created_by: &str, input: OrderCreate) -> Result<Order, AppError> {
        let customer_name = input.customer_name.trim().to_string();
        if customer_name.is_empty() {
            return Err(AppError::validation("customer_name is required")
                .with_detail("field", "customer_name"));
        }
        if input.items.is_empty() {
            return Err(
                AppError::validation("items must not be empty").with_detail("field", "items")
            );
        }
        if !input.total_amount.is_finite() || input.total_amount <= 0.0 {
            return Err(AppError::validation("total_amount must be greater than 0")
                .with_detail("field", "total_amount"));
        }

        let number = self.store.next_number().await?;
        let now = now_rfc3339();
        let order = Order {
            order_id: order_id_for(number),
            customer_name,
            items: input.items,
            total_amount: input.total_amount,
            status: OrderStatus::Pending,
            created_by: created_by.to_string(),
            created_at: now.clone(),
            updated_at: now,
            delivery_address: input.delivery_address,
            notes: input.notes,
        };

        self.store.insert(number, &order).await?;
        Ok(order)
    }

    /// Filtered page of orders, newest first
    pub async fn list(&self, query: &OrderQuery) -> Result<OrderListResponse, AppError> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);

        let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(OrderStatus::parse(s).ok_or_else(|| invalid_status(s))?),
            None => None,
        };
        let filter = OrderFilter {
            status,
            customer: query
                .customer_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase),
        };

        let offset = (page as usize - 1).saturating_mul(per_page as usize);
        let slice = self
            .store
            .list(&filter, offset, per_page as usize)
            .await?;

        let total_pages = slice.total.div_ceil(per_page as usize);
        Ok(OrderListResponse {
            orders: slice.orders,
            pagination: Pagination {
                page,
                per_page,
                total_orders: slice.total,
                total_pages,
                has_next: (page as usize) < total_pages,
                has_prev: page > 1,
            },
        })
    }

    pub async fn get(&self, order_id: &str) -> Result<Order, AppError> {
        self.store
            .find(order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))
    }

    /// Move an order to a new status
    pub async fn update_status(&self, order_id: &str, status: &str) -> Result<Order, AppError> {
        let status = OrderStatus::parse(status).ok_or_else(|| invalid_status(status))?;
        self.store
            .set_status(order_id, status, &now_rfc3339())
            .await?
            .ok_or_else(|| order_not_found(order_id))
    }

    pub async fn stats(&self, total_users: u64) -> Result<OrderStats, AppError> {
        let summary = self.store.summary().await?;
        Ok(OrderStats {
            total_orders: summary.total_orders,
            total_users,
            total_amount: (summary.total_amount * 100.0).round() / 100.0,
            orders_by_status: summary.by_status,
            orders_by_user: summary.by_user,
        })
    }
}

fn order_not_found(order_id: &str) -> AppError {
    AppError::new(ErrorCode::OrderNotFound).with_detail("order_id", order_id)
}

fn invalid_status(status: &str) -> AppError {
    let valid: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.as_str()).collect();
    AppError::with_message(
        ErrorCode::OrderStatusInvalid,
        format!("Invalid status '{status}'. Must be one of: {}", valid.join(", ")),
    )
    .with_detail("status", status)
}
