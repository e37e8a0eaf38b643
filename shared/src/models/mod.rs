//! Data models shared between the service instance and its clients

pub mod order;

pub use order::{
    Order, OrderCreate, OrderListResponse, OrderQuery, OrderResponse, OrderStats, OrderStatus,
    OrderUpdate, Pagination,
};
