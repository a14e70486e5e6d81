use std::sync::Arc;
use uuid::Uuid;

use crate::domain::order::OrderItem;
use crate::domain::product::Product;
use crate::metrics::Metrics;
use crate::store::ProductStore;
use crate::utils::{compare_and_swap, CasError, RetryConfig, RetryResult};

// ============================================================================
// Inventory Reconciler
// ============================================================================
//
// Applies one conditional stock write per order item. Each write is a
// compare-and-swap on the product version, retried on a lost race or a
// storage error. Failures are reported, never raised: an order that is
// already committed stays committed even if its stock could not follow.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Stock for product {product_id} size {size} still contended after {attempts} attempts")]
    RaceExhausted {
        product_id: Uuid,
        size: String,
        attempts: u32,
    },

    #[error("Product {0} no longer exists")]
    ProductMissing(Uuid),

    #[error("Storage error on product {product_id} after {attempts} attempts: {source}")]
    Store {
        product_id: Uuid,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockAdjustment {
    /// Checkout: take units out, floored at zero
    Decrement,
    /// Cancellation: put units back
    Restore,
}

impl StockAdjustment {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockAdjustment::Decrement => "decrement",
            StockAdjustment::Restore => "restore",
        }
    }

    fn apply(&self, product: &Product, size: &str, quantity: i32) -> Product {
        match self {
            StockAdjustment::Decrement => product.with_decrement(size, quantity),
            StockAdjustment::Restore => product.with_restock(size, quantity),
        }
    }
}

/// Outcome of adjusting stock for a whole order.
#[derive(Debug, Default)]
pub struct InventoryReport {
    pub applied: usize,
    pub failures: Vec<InventoryError>,
}

impl InventoryReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct InventoryReconciler {
    products: Arc<dyn ProductStore>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl InventoryReconciler {
    pub fn new(products: Arc<dyn ProductStore>, retry: RetryConfig, metrics: Arc<Metrics>) -> Self {
        Self { products, retry, metrics }
    }

    pub async fn decrement(&self, items: &[OrderItem]) -> InventoryReport {
        self.adjust(StockAdjustment::Decrement, items).await
    }

    pub async fn restore(&self, items: &[OrderItem]) -> InventoryReport {
        self.adjust(StockAdjustment::Restore, items).await
    }

    async fn adjust(&self, adjustment: StockAdjustment, items: &[OrderItem]) -> InventoryReport {
        let mut report = InventoryReport::default();

        for item in items {
            match self.adjust_item(adjustment, item).await {
                Ok(product) => {
                    tracing::debug!(
                        product_id = %item.product_id,
                        size = %item.size,
                        quantity = item.quantity,
                        remaining = product.quantity_of(&item.size),
                        operation = adjustment.as_str(),
                        "Stock adjusted"
                    );
                    report.applied += 1;
                }
                Err(e @ InventoryError::ProductMissing(_)) => {
                    tracing::warn!(order_id = %item.order_id, error = %e, "Skipping stock adjustment");
                    report.failures.push(e);
                }
                Err(e) => {
                    tracing::error!(
                        order_id = %item.order_id,
                        operation = adjustment.as_str(),
                        error = %e,
                        "InventoryRaceExhausted: stock left stale"
                    );
                    report.failures.push(e);
                }
            }
        }

        report
    }

    async fn adjust_item(&self, adjustment: StockAdjustment, item: &OrderItem) -> Result<Product, InventoryError> {
        let products = &self.products;
        let product_id = item.product_id;

        let result = compare_and_swap(
            self.retry.clone(),
            move || products.get_product(product_id),
            |current: &Product| adjustment.apply(current, &item.size, item.quantity),
            move |next: Product, expected| async move { products.compare_and_set_stock(&next, expected).await },
        )
        .await;

        self.metrics.record_cas(
            adjustment.as_str(),
            result.attempts(),
            matches!(result, RetryResult::Failed { .. }),
        );

        match result {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Failed { error, attempts } | RetryResult::PermanentFailure { error, attempts } => {
                Err(match error {
                    CasError::NotFound => InventoryError::ProductMissing(product_id),
                    CasError::Conflict { .. } => InventoryError::RaceExhausted {
                        product_id,
                        size: item.size.clone(),
                        attempts,
                    },
                    CasError::Store(source) => InventoryError::Store { product_id, attempts, source },
                })
            }
        }
    }
}
