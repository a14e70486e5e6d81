// ============================================================================
// Storage Seams
// ============================================================================
//
// The engine only talks to storage through these traits. Two backends:
// - memory        - process-local maps, used by tests and local runs
// - scylla_store  - ScyllaDB; conditional writes are lightweight transactions
//
// Every method is a suspension point; no engine code holds a lock across one.
//
// ============================================================================

mod memory;
mod scylla_store;

pub use memory::MemoryStore;
pub use scylla_store::ScyllaStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::audit::ReferenceEpoch;
use crate::domain::order::{Order, OrderItem, OrderStatus};
use crate::domain::product::{Product, StockHistoryEntry};

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;

    /// Owned by product management; the engine only uses it to seed data.
    async fn insert_product(&self, product: &Product) -> Result<()>;

    /// Write `product`'s stock only if the stored version is still
    /// `expected_version`. Returns whether the write was applied.
    async fn compare_and_set_stock(&self, product: &Product, expected_version: i64) -> Result<bool>;

    async fn list_products_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Product>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Whether `insert_order_with_items` writes both in one atomic unit.
    fn supports_atomic_writes(&self) -> bool;

    async fn insert_order_with_items(&self, order: &Order, items: &[OrderItem]) -> Result<()>;

    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn insert_items(&self, items: &[OrderItem]) -> Result<()>;

    /// Physical removal. Only used to compensate a half-written order.
    async fn delete_order(&self, id: Uuid) -> Result<()>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn get_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>>;

    async fn get_order_with_items(&self, id: Uuid) -> Result<Option<Order>> {
        let (order, items) = futures_util::future::try_join(self.get_order(id), self.get_items(id)).await?;
        Ok(order.map(|order| Order { items, ..order }))
    }

    async fn recent_orders_for_user(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Order>>;

    /// Persist the mutable fields of `order` (status, deletion and restore
    /// flags, updated_at) if the stored order is not deleted and its status
    /// is still `expected_status`.
    async fn update_order_if_status(&self, order: &Order, expected_status: OrderStatus) -> Result<bool>;

    /// Orders created on/after `since`, items attached.
    async fn list_orders_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Order>>;
}

/// Append-only feed written by product management.
#[async_trait]
pub trait StockHistoryFeed: Send + Sync {
    async fn append_entry(&self, entry: &StockHistoryEntry) -> Result<()>;

    async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<StockHistoryEntry>>;
}

#[async_trait]
pub trait EngineConfigStore: Send + Sync {
    async fn get_reference_epoch(&self) -> Result<Option<ReferenceEpoch>>;

    /// Store `epoch` if the persisted version is `expected_version`
    /// (`None`: no row yet). Returns whether the write was applied.
    async fn put_reference_epoch(&self, epoch: &ReferenceEpoch, expected_version: Option<i64>) -> Result<bool>;
}
