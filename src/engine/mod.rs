// ============================================================================
// Order Engine
// ============================================================================
//
// Orchestration over the store traits:
// - checkout    - validate, suppress duplicates, write, decrement, notify
// - duplicate   - recent-repeat heuristic
// - writer      - order + items as one unit (atomic or compensated)
// - inventory   - per-item conditional stock writes
// - status      - back-office status changes and cancellation restores
// - audit       - stock drift report and reference epoch
//
// ============================================================================

mod audit;
mod checkout;
mod duplicate;
mod inventory;
mod status;
mod writer;

use audit::AuditEngine;
use duplicate::DuplicateSuppressor;
use inventory::InventoryReconciler;
use status::StatusManager;
use writer::OrderWriter;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::audit::{ProductAuditRow, ReferenceEpoch};
use crate::domain::order::{Order, OrderError, OrderStatus};
use crate::domain::AdminContext;
use crate::metrics::Metrics;
use crate::notify::NotificationDispatcher;
use crate::store::{EngineConfigStore, OrderStore, ProductStore, StockHistoryFeed};

/// The storage handles the engine runs against.
#[derive(Clone)]
pub struct Stores {
    pub products: Arc<dyn ProductStore>,
    pub orders: Arc<dyn OrderStore>,
    pub history: Arc<dyn StockHistoryFeed>,
    pub settings: Arc<dyn EngineConfigStore>,
}

impl Stores {
    /// All four roles served by one backend.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ProductStore + OrderStore + StockHistoryFeed + EngineConfigStore + 'static,
    {
        Self {
            products: store.clone(),
            orders: store.clone(),
            history: store.clone(),
            settings: store,
        }
    }
}

pub struct OrderEngine {
    duplicates: DuplicateSuppressor,
    writer: OrderWriter,
    inventory: InventoryReconciler,
    status: StatusManager,
    audit: AuditEngine,
    notifier: Arc<dyn NotificationDispatcher>,
    metrics: Arc<Metrics>,
}

impl OrderEngine {
    pub fn new(
        stores: Stores,
        notifier: Arc<dyn NotificationDispatcher>,
        metrics: Arc<Metrics>,
        config: EngineConfig,
    ) -> Self {
        let inventory =
            InventoryReconciler::new(stores.products.clone(), config.inventory_retry.clone(), metrics.clone());

        Self {
            duplicates: DuplicateSuppressor::new(stores.orders.clone(), config.duplicate_window),
            writer: OrderWriter::new(stores.orders.clone(), metrics.clone()),
            status: StatusManager::new(stores.orders.clone(), inventory.clone(), metrics.clone()),
            audit: AuditEngine::new(
                stores.products,
                stores.orders,
                stores.history,
                stores.settings,
                config.default_reference_epoch,
                config.inventory_retry,
                metrics.clone(),
            ),
            inventory,
            notifier,
            metrics,
        }
    }

    pub async fn update_order_status(
        &self,
        admin: &AdminContext,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<Order, OrderError> {
        self.status.update_status(admin, order_id, new_status).await
    }

    pub async fn cancel_order(&self, admin: &AdminContext, order_id: Uuid) -> Result<Order, OrderError> {
        self.status.update_status(admin, order_id, OrderStatus::Cancelled).await
    }

    pub async fn purge_duplicate_order(&self, admin: &AdminContext, order_id: Uuid) -> Result<(), OrderError> {
        self.status.purge_duplicate(admin, order_id).await
    }

    pub async fn soft_delete_order(&self, admin: &AdminContext, order_id: Uuid) -> Result<(), OrderError> {
        self.status.soft_delete(admin, order_id).await
    }

    pub async fn run_audit(&self, admin: &AdminContext, epoch: DateTime<Utc>) -> anyhow::Result<Vec<ProductAuditRow>> {
        self.audit.run_audit(admin, epoch).await
    }

    pub async fn run_current_audit(&self, admin: &AdminContext) -> anyhow::Result<Vec<ProductAuditRow>> {
        self.audit.run_current_audit(admin).await
    }

    pub async fn current_reference_epoch(&self) -> anyhow::Result<ReferenceEpoch> {
        self.audit.current_reference_epoch().await
    }

    pub async fn rebase_reference_epoch(
        &self,
        admin: &AdminContext,
        new_epoch: DateTime<Utc>,
    ) -> anyhow::Result<ReferenceEpoch> {
        self.audit.rebase_reference_epoch(admin, new_epoch).await
    }

    pub fn audit_csv(&self, rows: &[ProductAuditRow]) -> String {
        crate::domain::audit::audit_csv(rows)
    }
}
