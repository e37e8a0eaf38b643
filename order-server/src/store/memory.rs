//! In-process store backends
//!
//! Used when no `DATABASE_URL` is configured, and by tests that run several
//! instances inside one process against the same `Arc`.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::models::{Order, OrderStatus};
use shared::util::now_millis;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{
    CredentialRecord, CredentialStore, Ledger, OrderFilter, OrderSlice, OrderStore, OrderSummary,
    StoreError, ttl_millis,
};

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    count: u64,
    /// Unix millis
    expires_at: i64,
}

impl LedgerEntry {
    fn fresh(now: i64, ttl: Duration) -> Self {
        Self {
            count: 0,
            expires_at: now.saturating_add(ttl_millis(ttl)),
        }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// DashMap-backed ledger
///
/// Per-key atomicity comes from the shard lock held by the entry API.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: DashMap<String, LedgerEntry>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, live or not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = now_millis();
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| LedgerEntry::fresh(now, ttl));
        if !entry.is_live(now) {
            *entry = LedgerEntry::fresh(now, ttl);
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = now_millis();
        let marker = LedgerEntry {
            count: 1,
            ..LedgerEntry::fresh(now, ttl)
        };
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(marker);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(marker);
                Ok(true)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_millis();
        if self.entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(true);
        }
        // Lazy GC
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        Ok(false)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// DashMap-backed credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: DashMap<String, CredentialRecord>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert(&self, record: CredentialRecord) -> Result<bool, StoreError> {
        match self.records.entry(record.username.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(true)
            }
        }
    }

    async fn find(&self, username: &str) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.records.get(username).map(|r| r.value().clone()))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.records.len() as u64)
    }
}

#[derive(Debug, Default)]
struct OrderTable {
    /// Keyed by order number, so iteration runs oldest first
    by_number: BTreeMap<u64, Order>,
    numbers: HashMap<String, u64>,
}

/// In-process order store
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    sequence: AtomicU64,
    table: RwLock<OrderTable>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn next_number(&self) -> Result<u64, StoreError> {
        Ok(self.sequence.fetch_add(1, Ordering::AcqRel) + 1)
    }

    async fn insert(&self, number: u64, order: &Order) -> Result<(), StoreError> {
        let mut table = self.table.write().await;
        if table.numbers.contains_key(&order.order_id) {
            return Err(StoreError::Corrupt(format!(
                "order id {} already stored",
                order.order_id
            )));
        }
        table.numbers.insert(order.order_id.clone(), number);
        table.by_number.insert(number, order.clone());
        Ok(())
    }

    async fn find(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let table = self.table.read().await;
        Ok(table
            .numbers
            .get(order_id)
            .and_then(|n| table.by_number.get(n))
            .cloned())
    }

    async fn list(
        &self,
        filter: &OrderFilter,
        offset: usize,
        limit: usize,
    ) -> Result<OrderSlice, StoreError> {
        let table = self.table.read().await;
        let matching: Vec<&Order> = table
            .by_number
            .values()
            .rev()
            .filter(|o| filter.matches(o))
            .collect();

        Ok(OrderSlice {
            total: matching.len(),
            orders: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
        })
    }

    async fn set_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        updated_at: &str,
    ) -> Result<Option<Order>, StoreError> {
        let mut table = self.table.write().await;
        let Some(number) = table.numbers.get(order_id).copied() else {
            return Ok(None);
        };
        Ok(table.by_number.get_mut(&number).map(|order| {
            order.status = status;
            order.updated_at = updated_at.to_string();
            order.clone()
        }))
    }

    async fn summary(&self) -> Result<OrderSummary, StoreError> {
        let table = self.table.read().await;
        let mut summary = OrderSummary {
            total_orders: table.by_number.len(),
            ..Default::default()
        };
        for order in table.by_number.values() {
            *summary
                .by_status
                .entry(order.status.as_str().to_string())
                .or_insert(0) += 1;
            *summary.by_user.entry(order.created_by.clone()).or_insert(0) += 1;
            summary.total_amount += order.total_amount;
        }
        Ok(summary)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.table.read().await.by_number.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::order_id_for;
    use std::sync::Arc;

    fn order(number: u64, customer: &str, created_by: &str) -> Order {
        Order {
            order_id: order_id_for(number),
            customer_name: customer.to_string(),
            items: vec![serde_json::json!({"sku": "A1"})],
            total_amount: 4.5,
            status: OrderStatus::Pending,
            created_by: created_by.to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            delivery_address: None,
            notes: None,
        }
    }

    fn record(username: &str) -> CredentialRecord {
        CredentialRecord {
            user_id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            created_at: now_millis(),
        }
    }

    #[tokio::test]
    async fn test_increment_counts_up() {
        let ledger = MemoryLedger::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(ledger.increment("k", ttl).await.unwrap(), 1);
        assert_eq!(ledger.increment("k", ttl).await.unwrap(), 2);
        assert_eq!(ledger.increment("other", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_restarts_after_expiry() {
        let ledger = MemoryLedger::new();
        let ttl = Duration::from_millis(20);
        ledger.increment("k", ttl).await.unwrap();
        ledger.increment("k", ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(ledger.increment("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    ledger
                        .increment("shared", Duration::from_secs(60))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            ledger
                .increment("shared", Duration::from_secs(60))
                .await
                .unwrap(),
            16 * 50 + 1
        );
    }

    #[tokio::test]
    async fn test_set_if_absent_marker_lifecycle() {
        let ledger = MemoryLedger::new();
        let ttl = Duration::from_millis(20);
        assert!(ledger.set_if_absent("revoked:a", ttl).await.unwrap());
        assert!(!ledger.set_if_absent("revoked:a", ttl).await.unwrap());
        assert!(ledger.exists("revoked:a").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!ledger.exists("revoked:a").await.unwrap());
        // Lazily collected on read
        assert!(ledger.is_empty());
        assert!(ledger.set_if_absent("revoked:a", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let ledger = MemoryLedger::new();
        ledger
            .increment("short", Duration::from_millis(10))
            .await
            .unwrap();
        ledger
            .increment("long", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(ledger.purge_expired().await.unwrap(), 1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.exists("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_credential_insert_rejects_duplicate() {
        let store = MemoryCredentialStore::new();
        assert!(store.insert(record("alice")).await.unwrap());
        assert!(!store.insert(record("alice")).await.unwrap());
        assert!(store.insert(record("bob")).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);

        let found = store.find("alice").await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert!(store.find("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_order_numbers_are_unique_under_concurrency() {
        let store = Arc::new(MemoryOrderStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut drawn = Vec::new();
                for _ in 0..25 {
                    drawn.push(store.next_number().await.unwrap());
                }
                drawn
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(all.first(), Some(&1));
    }

    #[tokio::test]
    async fn test_order_list_filter_and_status() {
        let store = MemoryOrderStore::new();
        for (customer, user) in [("Acme", "alice"), ("Globex", "bob"), ("Acme East", "alice")] {
            let number = store.next_number().await.unwrap();
            store.insert(number, &order(number, customer, user)).await.unwrap();
        }

        let all = store.list(&OrderFilter::default(), 0, 10).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.orders[0].order_id, "ORD-000003");

        let acme = OrderFilter {
            customer: Some("acme".into()),
            ..Default::default()
        };
        let page = store.list(&acme, 1, 10).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.orders.len(), 1);
        assert_eq!(page.orders[0].order_id, "ORD-000001");

        let updated = store
            .set_status("ORD-000002", OrderStatus::Shipped, "2026-01-02T00:00:00Z")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Shipped);
        assert!(
            store
                .set_status("ORD-000009", OrderStatus::Shipped, "now")
                .await
                .unwrap()
                .is_none()
        );

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total_orders, 3);
        assert_eq!(summary.by_status.get("shipped"), Some(&1));
        assert_eq!(summary.by_user.get("alice"), Some(&2));
        assert_eq!(store.count().await.unwrap(), 3);
    }
}
