//! Shared stores
//!
//! Three capabilities back every instance:
//! - [`Ledger`] - TTL-windowed counters and markers (quota counters,
//!   revoked-token markers)
//! - [`CredentialStore`] - hashed credentials keyed by identity
//! - [`OrderStore`] - orders and the order number sequence
//!
//! All are injected as trait objects so several instances can share one
//! backend. [`memory`] serves tests and single-process development,
//! [`postgres`] serves real deployments.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use shared::models::{Order, OrderStatus};
use shared::{AppError, ErrorCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::{MemoryCredentialStore, MemoryLedger, MemoryOrderStore};
pub use postgres::{PgCredentialStore, PgLedger, PgOrderStore};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid stored data: {0}")]
    Corrupt(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::with_message(ErrorCode::StoreUnavailable, err.to_string())
    }
}

/// TTL-windowed counter and marker store
///
/// Every operation is atomic per key. An entry whose TTL has elapsed is
/// treated as absent by all operations, whether or not it was swept yet.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Increment the counter at `key`, creating it with `ttl` when absent or
    /// expired. Returns the post-increment count.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Insert a marker at `key` unless a live one exists.
    /// Returns `true` when this call inserted it.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Whether a live entry exists at `key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    /// Check the backend is reachable
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Stored credential
#[derive(Debug, Clone, Serialize)]
pub struct CredentialRecord {
    pub user_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Unix millis
    pub created_at: i64,
}

/// Hashed credential store
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert the record unless its identity already exists.
    /// Returns `false` on a duplicate identity.
    async fn insert(&self, record: CredentialRecord) -> Result<bool, StoreError>;

    /// Look up a record by identity
    async fn find(&self, username: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Number of registered identities
    async fn count(&self) -> Result<u64, StoreError>;
}

/// Listing filter, applied before paging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    /// Case-insensitive substring of the customer name, already lowercased
    pub customer: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status == s)
            && self
                .customer
                .as_deref()
                .is_none_or(|c| order.customer_name.to_lowercase().contains(c))
    }
}

/// One page of matching orders plus the total match count
#[derive(Debug, Clone, Default)]
pub struct OrderSlice {
    pub orders: Vec<Order>,
    pub total: usize,
}

/// Aggregates over every stored order
#[derive(Debug, Clone, Default)]
pub struct OrderSummary {
    pub total_orders: usize,
    pub total_amount: f64,
    pub by_status: BTreeMap<String, usize>,
    pub by_user: BTreeMap<String, usize>,
}

/// Order persistence
///
/// Numbers come from one sequence per backend, so instances sharing a
/// backend never hand out the same order id.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Draw the next order number
    async fn next_number(&self) -> Result<u64, StoreError>;

    /// Store a new order under its number
    async fn insert(&self, number: u64, order: &Order) -> Result<(), StoreError>;

    async fn find(&self, order_id: &str) -> Result<Option<Order>, StoreError>;

    /// Matching orders, newest first
    async fn list(
        &self,
        filter: &OrderFilter,
        offset: usize,
        limit: usize,
    ) -> Result<OrderSlice, StoreError>;

    /// Set the status of an order. `None` when it does not exist.
    async fn set_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        updated_at: &str,
    ) -> Result<Option<Order>, StoreError>;

    async fn summary(&self) -> Result<OrderSummary, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Store set handed to each instance
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn Ledger>,
    pub credentials: Arc<dyn CredentialStore>,
    pub orders: Arc<dyn OrderStore>,
}

impl Stores {
    /// Fresh in-process stores. Clones share them.
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(MemoryLedger::new()),
            credentials: Arc::new(MemoryCredentialStore::new()),
            orders: Arc::new(MemoryOrderStore::new()),
        }
    }

    /// PostgreSQL-backed stores, migrations applied
    pub async fn postgres(database_url: &str) -> Result<Self, StoreError> {
        let pool = postgres::connect(database_url).await?;
        Ok(Self {
            ledger: Arc::new(PgLedger::new(pool.clone())),
            credentials: Arc::new(PgCredentialStore::new(pool.clone())),
            orders: Arc::new(PgOrderStore::new(pool)),
        })
    }
}

/// Order id for a sequence number
pub fn order_id_for(number: u64) -> String {
    format!("ORD-{number:06}")
}

/// Ledger TTL in whole milliseconds, never zero
pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}
