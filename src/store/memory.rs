use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Barrier, RwLock};
use uuid::Uuid;

use crate::domain::audit::ReferenceEpoch;
use crate::domain::order::{Order, OrderItem, OrderStatus};
use crate::domain::product::{Product, StockHistoryEntry};
use super::{EngineConfigStore, OrderStore, ProductStore, StockHistoryFeed};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Implements every storage trait over process-local maps. Conditional writes
// check the version/status under the write lock, so they behave like the
// Scylla LWTs. Fault switches let tests drive the failure paths.
//
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    products: RwLock<HashMap<Uuid, Product>>,
    orders: RwLock<HashMap<Uuid, Order>>,
    items: RwLock<HashMap<Uuid, Vec<OrderItem>>>,
    history: RwLock<Vec<StockHistoryEntry>>,
    reference_epoch: RwLock<Option<ReferenceEpoch>>,

    non_atomic: bool,
    fail_item_inserts: AtomicBool,
    fail_item_reads: AtomicBool,
    forced_stock_conflicts: AtomicU32,
    status_write_gate: RwLock<Option<Arc<Barrier>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that writes order and items separately, forcing the
    /// compensating-delete path in the order writer.
    pub fn without_atomic_writes() -> Self {
        Self {
            non_atomic: true,
            ..Self::default()
        }
    }

    pub fn fail_item_inserts(&self, fail: bool) {
        self.fail_item_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_item_reads(&self, fail: bool) {
        self.fail_item_reads.store(fail, Ordering::SeqCst);
    }

    /// The next `count` stock writes lose to a simulated concurrent writer.
    pub fn force_stock_conflicts(&self, count: u32) {
        self.forced_stock_conflicts.store(count, Ordering::SeqCst);
    }

    /// Conditional status writes wait on `barrier` before checking, so
    /// callers that all read the same status race on the write.
    pub async fn gate_status_writes(&self, barrier: Arc<Barrier>) {
        *self.status_write_gate.write().await = Some(barrier);
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_stock_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        self.products.write().await.insert(product.id, product.clone());
        Ok(())
    }

    async fn compare_and_set_stock(&self, product: &Product, expected_version: i64) -> Result<bool> {
        let mut products = self.products.write().await;
        let Some(stored) = products.get_mut(&product.id) else {
            return Ok(false);
        };

        if self.take_forced_conflict() {
            stored.version += 1;
            return Ok(false);
        }
        if stored.version != expected_version {
            return Ok(false);
        }

        stored.sizes = product.sizes.clone();
        stored.in_stock = product.in_stock;
        stored.version = product.version;
        stored.updated_at = product.updated_at;
        Ok(true)
    }

    async fn list_products_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Product>> {
        let products = self.products.read().await;
        Ok(products.values().filter(|p| p.created_at >= since).cloned().collect())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    fn supports_atomic_writes(&self) -> bool {
        !self.non_atomic
    }

    async fn insert_order_with_items(&self, order: &Order, items: &[OrderItem]) -> Result<()> {
        if self.fail_item_inserts.load(Ordering::SeqCst) {
            bail!("injected failure writing order batch");
        }
        let mut orders = self.orders.write().await;
        let mut stored_items = self.items.write().await;
        orders.insert(order.id, order.without_items());
        stored_items.insert(order.id, items.to_vec());
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.orders.write().await.insert(order.id, order.without_items());
        Ok(())
    }

    async fn insert_items(&self, items: &[OrderItem]) -> Result<()> {
        if self.fail_item_inserts.load(Ordering::SeqCst) {
            bail!("injected failure inserting order items");
        }
        let mut stored = self.items.write().await;
        for item in items {
            stored.entry(item.order_id).or_default().push(item.clone());
        }
        Ok(())
    }

    async fn delete_order(&self, id: Uuid) -> Result<()> {
        self.orders.write().await.remove(&id);
        self.items.write().await.remove(&id);
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn get_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        if self.fail_item_reads.load(Ordering::SeqCst) {
            bail!("injected failure reading order items");
        }
        Ok(self.items.read().await.get(&order_id).cloned().unwrap_or_default())
    }

    async fn recent_orders_for_user(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| o.user_id == user_id && o.created_at >= since)
            .cloned()
            .collect())
    }

    async fn update_order_if_status(&self, order: &Order, expected_status: OrderStatus) -> Result<bool> {
        let gate = self.status_write_gate.read().await.clone();
        if let Some(barrier) = gate {
            barrier.wait().await;
        }

        let mut orders = self.orders.write().await;
        let Some(stored) = orders.get_mut(&order.id) else {
            return Ok(false);
        };
        if stored.is_deleted || stored.status != expected_status {
            return Ok(false);
        }

        stored.status = order.status;
        stored.is_deleted = order.is_deleted;
        stored.inventory_restored = order.inventory_restored;
        stored.updated_at = order.updated_at;
        Ok(true)
    }

    async fn list_orders_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let items = self.items.read().await;
        Ok(orders
            .values()
            .filter(|o| o.created_at >= since)
            .map(|o| Order {
                items: items.get(&o.id).cloned().unwrap_or_default(),
                ..o.clone()
            })
            .collect())
    }
}

#[async_trait]
impl StockHistoryFeed for MemoryStore {
    async fn append_entry(&self, entry: &StockHistoryEntry) -> Result<()> {
        self.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<StockHistoryEntry>> {
        let history = self.history.read().await;
        Ok(history.iter().filter(|e| e.created_at >= since).cloned().collect())
    }
}

#[async_trait]
impl EngineConfigStore for MemoryStore {
    async fn get_reference_epoch(&self) -> Result<Option<ReferenceEpoch>> {
        Ok(self.reference_epoch.read().await.clone())
    }

    async fn put_reference_epoch(&self, epoch: &ReferenceEpoch, expected_version: Option<i64>) -> Result<bool> {
        let mut stored = self.reference_epoch.write().await;
        if stored.as_ref().map(|e| e.version) != expected_version {
            return Ok(false);
        }
        *stored = Some(epoch.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn product() -> Product {
        Product::new("Boubou", 15000, BTreeMap::from([("M".to_string(), 3)]))
    }

    #[tokio::test]
    async fn test_stock_write_rejected_on_stale_version() {
        let store = MemoryStore::new();
        let p = product();
        store.insert_product(&p).await.unwrap();

        let next = p.with_decrement("M", 1);
        assert!(store.compare_and_set_stock(&next, p.version).await.unwrap());
        // Same expected version again is now stale
        assert!(!store.compare_and_set_stock(&next, p.version).await.unwrap());

        let stored = store.get_product(p.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity_of("M"), 2);
        assert_eq!(stored.version, p.version + 1);
    }

    #[tokio::test]
    async fn test_forced_conflicts_are_consumed() {
        let store = MemoryStore::new();
        let p = product();
        store.insert_product(&p).await.unwrap();
        store.force_stock_conflicts(1);

        assert!(!store.compare_and_set_stock(&p.with_decrement("M", 1), p.version).await.unwrap());

        let current = store.get_product(p.id).await.unwrap().unwrap();
        assert!(store
            .compare_and_set_stock(&current.with_decrement("M", 1), current.version)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_epoch_put_requires_expected_version() {
        let store = MemoryStore::new();
        let first = ReferenceEpoch::installation_default(Utc::now()).rebased(Utc::now(), "a");

        assert!(!store.put_reference_epoch(&first, Some(3)).await.unwrap());
        assert!(store.put_reference_epoch(&first, None).await.unwrap());
        assert!(!store.put_reference_epoch(&first, None).await.unwrap());

        let second = first.rebased(Utc::now(), "b");
        assert!(store.put_reference_epoch(&second, Some(1)).await.unwrap());
        assert_eq!(store.get_reference_epoch().await.unwrap().unwrap().version, 2);
    }
}
