//! Order Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// Order record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub customer_name: String,
    pub items: Vec<serde_json::Value>,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub created_by: String,
    /// RFC 3339
    pub created_at: String,
    /// RFC 3339
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Create order payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreate {
    pub customer_name: String,
    pub items: Vec<serde_json::Value>,
    pub total_amount: f64,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
}

/// Update order payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub status: String,
}

/// Query parameters for listing orders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<String>,
    pub customer_name: Option<String>,
}

/// Pagination block of a list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total_orders: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub order: Order,
}

/// Aggregate statistics over all orders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_orders: usize,
    pub total_users: u64,
    pub total_amount: f64,
    pub orders_by_status: BTreeMap<String, usize>,
    pub orders_by_user: BTreeMap<String, usize>,
}
