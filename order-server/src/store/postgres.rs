//! PostgreSQL store backends
//!
//! Every instance pointed at the same database shares counters, revocation
//! markers, credentials and orders. Expiry times are Unix millis, as
//! elsewhere.

use async_trait::async_trait;
use shared::models::{Order, OrderStatus};
use shared::util::now_millis;
use sqlx::PgPool;
use sqlx::types::Json;
use std::time::Duration;

use super::{
    CredentialRecord, CredentialStore, Ledger, OrderFilter, OrderSlice, OrderStore, OrderSummary,
    StoreError, ttl_millis,
};

/// Connect to PostgreSQL and apply pending migrations
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;

    Ok(pool)
}

/// Ledger over the `ledger_entries` table
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = now_millis();
        let expires_at = now.saturating_add(ttl_millis(ttl));

        // Single statement: the row lock serialises concurrent increments
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO ledger_entries (key, count, expires_at) VALUES ($1, 1, $3)
             ON CONFLICT (key) DO UPDATE SET
                 count = CASE WHEN ledger_entries.expires_at <= $2
                              THEN 1 ELSE ledger_entries.count + 1 END,
                 expires_at = CASE WHEN ledger_entries.expires_at <= $2
                                   THEN $3 ELSE ledger_entries.expires_at END
             RETURNING count",
        )
        .bind(key)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = now_millis();
        let expires_at = now.saturating_add(ttl_millis(ttl));

        let inserted: Option<String> = sqlx::query_scalar(
            "INSERT INTO ledger_entries (key, count, expires_at) VALUES ($1, 1, $3)
             ON CONFLICT (key) DO UPDATE SET count = 1, expires_at = EXCLUDED.expires_at
             WHERE ledger_entries.expires_at <= $2
             RETURNING key",
        )
        .bind(key)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_millis();
        let live: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM ledger_entries WHERE key = $1 AND expires_at > $2)",
        )
        .bind(key)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        if !live {
            sqlx::query("DELETE FROM ledger_entries WHERE key = $1 AND expires_at <= $2")
                .bind(key)
                .bind(now)
                .execute(&self.pool)
                .await?;
        }
        Ok(live)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM ledger_entries WHERE expires_at <= $1")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    username: String,
    user_id: String,
    password_hash: String,
    created_at: i64,
}

impl From<CredentialRow> for CredentialRecord {
    fn from(row: CredentialRow) -> Self {
        Self {
            user_id: row.user_id,
            username: row.username,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

/// Credential store over the `credentials` table
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn insert(&self, record: CredentialRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO credentials (username, user_id, password_hash, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (username) DO NOTHING",
        )
        .bind(&record.username)
        .bind(&record.user_id)
        .bind(&record.password_hash)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, username: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT username, user_id, password_hash, created_at
             FROM credentials WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CredentialRecord::from))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

const ORDER_COLUMNS: &str = "order_id, customer_name, items, total_amount, status, created_by, \
     created_at, updated_at, delivery_address, notes";

const ORDER_FILTER: &str = "($1::TEXT IS NULL OR status = $1) \
     AND ($2::TEXT IS NULL OR strpos(lower(customer_name), $2) > 0)";

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    customer_name: String,
    items: Json<Vec<serde_json::Value>>,
    total_amount: f64,
    status: String,
    created_by: String,
    created_at: String,
    updated_at: String,
    delivery_address: Option<String>,
    notes: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("order {} has status '{}'", row.order_id, row.status))
        })?;
        Ok(Self {
            order_id: row.order_id,
            customer_name: row.customer_name,
            items: row.items.0,
            total_amount: row.total_amount,
            status,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            delivery_address: row.delivery_address,
            notes: row.notes,
        })
    }
}

/// Order store over the `orders` table and the `order_numbers` sequence
#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn next_number(&self) -> Result<u64, StoreError> {
        let number: i64 = sqlx::query_scalar("SELECT nextval('order_numbers')")
            .fetch_one(&self.pool)
            .await?;
        Ok(number.max(0) as u64)
    }

    async fn insert(&self, number: u64, order: &Order) -> Result<(), StoreError> {
        let number = i64::try_from(number)
            .map_err(|_| StoreError::Corrupt(format!("order number {number} out of range")))?;
        sqlx::query(
            "INSERT INTO orders (number, order_id, customer_name, items, total_amount, status,
                                 created_by, created_at, updated_at, delivery_address, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(number)
        .bind(&order.order_id)
        .bind(&order.customer_name)
        .bind(Json(&order.items))
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(&order.created_by)
        .bind(&order.created_at)
        .bind(&order.updated_at)
        .bind(&order.delivery_address)
        .bind(&order.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"))
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Order::try_from).transpose()
    }

    async fn list(
        &self,
        filter: &OrderFilter,
        offset: usize,
        limit: usize,
    ) -> Result<OrderSlice, StoreError> {
        let status = filter.status.map(|s| s.as_str());
        let customer = filter.customer.as_deref();

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM orders WHERE {ORDER_FILTER}"))
                .bind(status)
                .bind(customer)
                .fetch_one(&self.pool)
                .await?;

        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {ORDER_FILTER}
             ORDER BY number DESC OFFSET $3 LIMIT $4"
        ))
        .bind(status)
        .bind(customer)
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(OrderSlice {
            orders: rows
                .into_iter()
                .map(Order::try_from)
                .collect::<Result<_, _>>()?,
            total: total.max(0) as usize,
        })
    }

    async fn set_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        updated_at: &str,
    ) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "UPDATE orders SET status = $2, updated_at = $3 WHERE order_id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(status.as_str())
        .bind(updated_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn summary(&self) -> Result<OrderSummary, StoreError> {
        let (total_orders, total_amount): (i64, f64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(total_amount), 0)::FLOAT8 FROM orders")
                .fetch_one(&self.pool)
                .await?;
        let by_status: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM orders GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let by_user: Vec<(String, i64)> =
            sqlx::query_as("SELECT created_by, COUNT(*) FROM orders GROUP BY created_by")
                .fetch_all(&self.pool)
                .await?;

        Ok(OrderSummary {
            total_orders: total_orders.max(0) as usize,
            total_amount,
            by_status: by_status
                .into_iter()
                .map(|(k, n)| (k, n.max(0) as usize))
                .collect(),
            by_user: by_user
                .into_iter()
                .map(|(k, n)| (k, n.max(0) as usize))
                .collect(),
        })
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
