use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::audit::{BaselineSource, ProductAuditRow, ReferenceEpoch, StockReconciliation};
use crate::domain::order::Order;
use crate::domain::product::{Product, StockHistoryEntry};
use crate::domain::AdminContext;
use crate::metrics::Metrics;
use crate::store::{EngineConfigStore, OrderStore, ProductStore, StockHistoryFeed};
use crate::utils::{compare_and_swap, RetryConfig};

// ============================================================================
// Stock Audit
// ============================================================================
//
// For every product created since the reference epoch:
//
//   expected_remaining = stock_initial - units ordered since the epoch
//   difference         = actual_remaining - expected_remaining
//
// stock_initial is the sum of stock additions recorded since the epoch, but
// only when the history includes the product's opening stock (an entry within
// CREATION_GRACE_SECS of created_at). Otherwise the history is partial and the
// baseline falls back to current + ordered, which balances by construction. Orders whose stock was given back on
// cancellation are left out of "ordered".
//
// Read-only apart from the reference epoch row.
//
// ============================================================================

/// Seconds after product creation within which its opening stock entry is recorded.
const CREATION_GRACE_SECS: i64 = 300;

pub struct AuditEngine {
    products: Arc<dyn ProductStore>,
    orders: Arc<dyn OrderStore>,
    history: Arc<dyn StockHistoryFeed>,
    settings: Arc<dyn EngineConfigStore>,
    default_epoch: DateTime<Utc>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl AuditEngine {
    pub fn new(
        products: Arc<dyn ProductStore>,
        orders: Arc<dyn OrderStore>,
        history: Arc<dyn StockHistoryFeed>,
        settings: Arc<dyn EngineConfigStore>,
        default_epoch: DateTime<Utc>,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            products,
            orders,
            history,
            settings,
            default_epoch,
            retry,
            metrics,
        }
    }

    pub async fn run_audit(&self, admin: &AdminContext, epoch: DateTime<Utc>) -> Result<Vec<ProductAuditRow>> {
        let (products, orders, entries) = futures_util::future::try_join3(
            self.products.list_products_created_since(epoch),
            self.orders.list_orders_created_since(epoch),
            self.history.entries_since(epoch),
        )
        .await
        .context("Failed to load audit data")?;

        let ordered = ordered_by_product(&orders);

        let mut history: HashMap<Uuid, Vec<&StockHistoryEntry>> = HashMap::new();
        for entry in &entries {
            history.entry(entry.product_id).or_default().push(entry);
        }

        let mut rows: Vec<ProductAuditRow> = products
            .iter()
            .map(|product| {
                let added = history.get(&product.id).and_then(|e| history_baseline(product, e));
                audit_row(product, ordered.get(&product.id), added)
            })
            .collect();
        rows.sort_by(|a, b| a.title.cmp(&b.title));

        let anomalies = rows.iter().filter(|r| r.is_anomalous()).count();
        self.metrics.set_audit_anomalies(anomalies);

        tracing::info!(
            admin_id = %admin.admin_id(),
            epoch = %epoch,
            products = rows.len(),
            orders = orders.len(),
            anomalies = anomalies,
            "Stock audit completed"
        );

        Ok(rows)
    }

    pub async fn run_current_audit(&self, admin: &AdminContext) -> Result<Vec<ProductAuditRow>> {
        let epoch = self.current_reference_epoch().await?;
        self.run_audit(admin, epoch.epoch).await
    }

    /// The stored epoch, or the installation default when none was ever set.
    pub async fn current_reference_epoch(&self) -> Result<ReferenceEpoch> {
        let stored = self
            .settings
            .get_reference_epoch()
            .await
            .context("Failed to read reference epoch")?;
        Ok(stored.unwrap_or_else(|| ReferenceEpoch::installation_default(self.default_epoch)))
    }

    /// Last writer wins. Each attempt overwrites the version it read; only a
    /// write racing in between forces another attempt.
    pub async fn rebase_reference_epoch(
        &self,
        admin: &AdminContext,
        new_epoch: DateTime<Utc>,
    ) -> Result<ReferenceEpoch> {
        let settings = &self.settings;

        let result = compare_and_swap(
            self.retry.clone(),
            move || async move { Ok::<_, anyhow::Error>(Some(self.current_reference_epoch().await?)) },
            |current: &ReferenceEpoch| {
                tracing::info!(
                    admin_id = %admin.admin_id(),
                    previous_epoch = %current.epoch,
                    previous_version = current.version,
                    previous_updated_by = ?current.updated_by,
                    new_epoch = %new_epoch,
                    "Overwriting reference epoch"
                );
                current.rebased(new_epoch, admin.admin_id())
            },
            move |next: ReferenceEpoch, expected: i64| async move {
                settings.put_reference_epoch(&next, (expected > 0).then_some(expected)).await
            },
        )
        .await;

        let attempts = result.attempts();
        let rebased = result
            .into_result()
            .with_context(|| format!("Failed to rebase reference epoch after {} attempts", attempts))?;

        tracing::info!(epoch = %rebased.epoch, version = rebased.version, "Reference epoch rebased");
        Ok(rebased)
    }
}

fn ordered_by_product(orders: &[Order]) -> HashMap<Uuid, BTreeMap<String, i64>> {
    let mut ordered: HashMap<Uuid, BTreeMap<String, i64>> = HashMap::new();

    for order in orders.iter().filter(|o| !o.inventory_restored) {
        for item in &order.items {
            *ordered
                .entry(item.product_id)
                .or_default()
                .entry(item.size.clone())
                .or_default() += i64::from(item.quantity);
        }
    }

    ordered
}

/// Total stock added, if the entries start with the product's opening stock.
fn history_baseline(product: &Product, entries: &[&StockHistoryEntry]) -> Option<i64> {
    let covers_creation = entries
        .iter()
        .any(|e| e.created_at <= product.created_at + chrono::Duration::seconds(CREATION_GRACE_SECS));
    if !covers_creation {
        tracing::debug!(product_id = %product.id, "No opening stock entry, reconstructing baseline");
        return None;
    }
    Some(entries.iter().map(|e| i64::from(e.total_added)).sum())
}

fn audit_row(product: &Product, ordered: Option<&BTreeMap<String, i64>>, added: Option<i64>) -> ProductAuditRow {
    let ordered_by_size = ordered.cloned().unwrap_or_default();
    let total_ordered: i64 = ordered_by_size.values().sum();
    let actual = product.total_stock();

    let (baseline, stock) = match added {
        Some(initial) => (
            BaselineSource::StockHistory,
            StockReconciliation::compute(initial, total_ordered, actual),
        ),
        None => (
            BaselineSource::Reconstructed,
            StockReconciliation::reconstructed(actual, total_ordered),
        ),
    };

    if stock.anomaly {
        tracing::warn!(
            product_id = %product.id,
            title = %product.title,
            expected = stock.expected_remaining,
            actual = stock.actual_remaining,
            difference = stock.difference,
            "Stock drift detected"
        );
    }

    ProductAuditRow {
        product_id: product.id,
        title: product.title.clone(),
        baseline,
        stock,
        ordered_by_size,
        remaining_by_size: product
            .sizes
            .iter()
            .map(|(size, qty)| (size.clone(), i64::from(*qty)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderItem, OrderStatus};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn engine(store: &Arc<MemoryStore>, default_epoch: DateTime<Utc>) -> AuditEngine {
        AuditEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            default_epoch,
            RetryConfig::fixed(3, Duration::from_millis(1)),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    fn sizes(entries: &[(&str, i32)]) -> BTreeMap<String, i32> {
        entries.iter().map(|(s, q)| (s.to_string(), *q)).collect()
    }

    async fn place(store: &MemoryStore, product: &Product, size: &str, quantity: i32, restored: bool) {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = Order {
            id: order_id,
            user_id: Uuid::new_v4(),
            total_amount: product.price * i64::from(quantity),
            status: if restored { OrderStatus::Cancelled } else { OrderStatus::Pending },
            customer_name: None,
            shipping_address: None,
            shipping_phone: None,
            notes: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            inventory_restored: restored,
            items: Vec::new(),
        };
        let item = OrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id: product.id,
            size: size.to_string(),
            color: None,
            quantity,
            unit_price: product.price,
            title: product.title.clone(),
            image_url: None,
        };
        store.insert_order_with_items(&order, &[item]).await.unwrap();
    }

    /// Overwrite a product's stock the way an out-of-band edit would.
    async fn set_stock(store: &MemoryStore, id: Uuid, size: &str, quantity: i32) {
        let current = store.get_product(id).await.unwrap().unwrap();
        let mut next = current.clone();
        next.sizes.insert(size.to_string(), quantity);
        next.version += 1;
        assert!(store.compare_and_set_stock(&next, current.version).await.unwrap());
    }

    /// Product stocked with 20 x M, 12 ordered and 8 left.
    async fn balanced_store() -> (Arc<MemoryStore>, Product) {
        let store = Arc::new(MemoryStore::new());
        let product = Product::new("Robe", 8000, sizes(&[("M", 20)]));
        store.insert_product(&product).await.unwrap();
        store
            .append_entry(&StockHistoryEntry::new(product.id, sizes(&[("M", 20)]), "admin-1"))
            .await
            .unwrap();
        place(&store, &product, "M", 12, false).await;
        set_stock(&store, product.id, "M", 8).await;
        (store, product)
    }

    fn an_hour_ago() -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(1)
    }

    #[tokio::test]
    async fn test_balanced_stock() {
        let (store, product) = balanced_store().await;
        let admin = AdminContext::new("admin-1");

        let rows = engine(&store, an_hour_ago()).run_current_audit(&admin).await.unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.product_id, product.id);
        assert_eq!(row.baseline, BaselineSource::StockHistory);
        assert_eq!(row.stock.stock_initial, 20);
        assert_eq!(row.stock.total_ordered, 12);
        assert_eq!(row.stock.expected_remaining, 8);
        assert_eq!(row.stock.difference, 0);
        assert!(!row.is_anomalous());
        assert_eq!(row.ordered_by_size.get("M"), Some(&12));
        assert_eq!(row.remaining_by_size.get("M"), Some(&8));
    }

    #[tokio::test]
    async fn test_missing_unit_is_flagged() {
        let (store, product) = balanced_store().await;
        set_stock(&store, product.id, "M", 7).await;
        let engine = engine(&store, an_hour_ago());

        let rows = engine
            .run_audit(&AdminContext::new("admin-1"), an_hour_ago())
            .await
            .unwrap();

        assert_eq!(rows[0].stock.difference, -1);
        assert!(rows[0].is_anomalous());
        assert_eq!(engine.metrics.audit_anomalies.get(), 1);
    }

    #[tokio::test]
    async fn test_restored_orders_are_not_counted() {
        let (store, product) = balanced_store().await;
        // Cancelled and given back, so stock is unchanged
        place(&store, &product, "M", 3, true).await;

        let rows = engine(&store, an_hour_ago())
            .run_audit(&AdminContext::new("admin-1"), an_hour_ago())
            .await
            .unwrap();

        assert_eq!(rows[0].stock.total_ordered, 12);
        assert!(!rows[0].is_anomalous());
    }

    #[tokio::test]
    async fn test_products_without_history_are_reconstructed() {
        let store = Arc::new(MemoryStore::new());
        let product = Product::new("Sac", 3000, sizes(&[("TU", 4)]));
        store.insert_product(&product).await.unwrap();
        place(&store, &product, "TU", 1, false).await;

        let rows = engine(&store, an_hour_ago())
            .run_audit(&AdminContext::new("admin-1"), an_hour_ago())
            .await
            .unwrap();

        assert_eq!(rows[0].baseline, BaselineSource::Reconstructed);
        assert_eq!(rows[0].stock.stock_initial, 5);
        assert!(!rows[0].is_anomalous());
    }

    #[tokio::test]
    async fn test_restock_without_opening_entry_is_reconstructed() {
        let store = Arc::new(MemoryStore::new());
        let product = Product::new("Tunique", 6000, sizes(&[("M", 10)]));
        store.insert_product(&product).await.unwrap();

        // Only a later restock of 5 was logged
        let mut restock = StockHistoryEntry::new(product.id, sizes(&[("M", 5)]), "admin-1");
        restock.created_at = product.created_at + chrono::Duration::hours(2);
        store.append_entry(&restock).await.unwrap();
        set_stock(&store, product.id, "M", 15).await;

        place(&store, &product, "M", 2, false).await;
        set_stock(&store, product.id, "M", 13).await;

        let rows = engine(&store, an_hour_ago())
            .run_audit(&AdminContext::new("admin-1"), an_hour_ago())
            .await
            .unwrap();

        let row = &rows[0];
        assert_eq!(row.baseline, BaselineSource::Reconstructed);
        assert_eq!(row.stock.stock_initial, 15);
        assert_eq!(row.stock.total_ordered, 2);
        assert_eq!(row.stock.actual_remaining, 13);
        assert!(!row.is_anomalous());
    }

    #[tokio::test]
    async fn test_opening_entry_plus_restock_uses_history() {
        let (store, product) = balanced_store().await;
        let mut restock = StockHistoryEntry::new(product.id, sizes(&[("M", 5)]), "admin-1");
        restock.created_at = product.created_at + chrono::Duration::hours(2);
        store.append_entry(&restock).await.unwrap();

        // Restock recorded but never applied to the product
        let rows = engine(&store, an_hour_ago())
            .run_audit(&AdminContext::new("admin-1"), an_hour_ago())
            .await
            .unwrap();

        assert_eq!(rows[0].baseline, BaselineSource::StockHistory);
        assert_eq!(rows[0].stock.stock_initial, 25);
        assert_eq!(rows[0].stock.difference, -5);
        assert!(rows[0].is_anomalous());
    }

    #[tokio::test]
    async fn test_rows_sorted_by_title() {
        let store = Arc::new(MemoryStore::new());
        for title in ["Veste", "Boubou", "Pagne"] {
            store.insert_product(&Product::new(title, 100, sizes(&[("M", 1)]))).await.unwrap();
        }

        let rows = engine(&store, an_hour_ago())
            .run_audit(&AdminContext::new("admin-1"), an_hour_ago())
            .await
            .unwrap();

        let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Boubou", "Pagne", "Veste"]);
    }

    #[tokio::test]
    async fn test_rebase_excludes_earlier_data() {
        let (store, _) = balanced_store().await;
        let engine = engine(&store, an_hour_ago());
        let admin = AdminContext::new("admin-2");

        assert!(!engine.current_reference_epoch().await.unwrap().is_persisted());

        let rebased = engine
            .rebase_reference_epoch(&admin, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(rebased.version, 1);
        assert_eq!(rebased.updated_by.as_deref(), Some("admin-2"));
        assert_eq!(engine.current_reference_epoch().await.unwrap(), rebased);

        let rows = engine.run_current_audit(&admin).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_successive_rebases_bump_version() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, an_hour_ago());
        let admin = AdminContext::new("admin-1");

        engine.rebase_reference_epoch(&admin, Utc::now()).await.unwrap();
        let second = engine.rebase_reference_epoch(&admin, an_hour_ago()).await.unwrap();

        assert_eq!(second.version, 2);
    }
}
