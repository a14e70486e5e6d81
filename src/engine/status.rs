use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::order::{Order, OrderError, OrderStatus};
use crate::domain::AdminContext;
use crate::metrics::Metrics;
use crate::store::OrderStore;
use super::inventory::InventoryReconciler;

/// Back-office status changes. Every write is conditional on the status that
/// was read, so two admins acting on the same order cannot both win.
pub struct StatusManager {
    orders: Arc<dyn OrderStore>,
    inventory: InventoryReconciler,
    metrics: Arc<Metrics>,
}

impl StatusManager {
    pub fn new(orders: Arc<dyn OrderStore>, inventory: InventoryReconciler, metrics: Arc<Metrics>) -> Self {
        Self { orders, inventory, metrics }
    }

    pub async fn update_status(
        &self,
        admin: &AdminContext,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<Order, OrderError> {
        let order = self.load(order_id).await?;
        if order.is_deleted {
            return Err(OrderError::OrderDeleted(order_id));
        }
        if order.status == new_status {
            return Ok(order);
        }
        if !order.status.can_transition_to(new_status) {
            return Err(OrderError::InvalidStatusTransition {
                from: order.status,
                to: new_status,
            });
        }

        let cancelling = new_status == OrderStatus::Cancelled;
        let next = Order {
            status: new_status,
            // Claimed together with the status so a restore happens at most once
            inventory_restored: order.inventory_restored || cancelling,
            updated_at: Utc::now(),
            ..order.clone()
        };
        self.write_if_status(&next, order.status).await?;

        self.metrics.record_transition(order.status.as_str(), new_status.as_str());
        tracing::info!(
            admin_id = %admin.admin_id(),
            order_id = %order_id,
            from = %order.status,
            to = %new_status,
            "Order status updated"
        );

        if cancelling {
            let report = self.inventory.restore(&next.items).await;
            if !report.is_complete() {
                tracing::warn!(
                    order_id = %order_id,
                    restored = report.applied,
                    failed = report.failures.len(),
                    "Order cancelled but some stock could not be restored"
                );
            }
        }

        Ok(next)
    }

    /// Cancel and hide an accidental duplicate. Its stock is not given back.
    pub async fn purge_duplicate(&self, admin: &AdminContext, order_id: Uuid) -> Result<(), OrderError> {
        let order = self.load(order_id).await?;
        if order.is_deleted {
            return Ok(());
        }

        let next = Order {
            status: OrderStatus::Cancelled,
            is_deleted: true,
            updated_at: Utc::now(),
            ..order.clone()
        };
        self.write_if_status(&next, order.status).await?;

        if order.status != OrderStatus::Cancelled {
            self.metrics.record_transition(order.status.as_str(), OrderStatus::Cancelled.as_str());
        }
        tracing::info!(admin_id = %admin.admin_id(), order_id = %order_id, "Duplicate order purged");
        Ok(())
    }

    pub async fn soft_delete(&self, admin: &AdminContext, order_id: Uuid) -> Result<(), OrderError> {
        let order = self.load(order_id).await?;
        if order.is_deleted {
            return Ok(());
        }

        let next = Order {
            is_deleted: true,
            updated_at: Utc::now(),
            ..order.clone()
        };
        self.write_if_status(&next, order.status).await?;

        tracing::info!(admin_id = %admin.admin_id(), order_id = %order_id, "Order soft deleted");
        Ok(())
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.orders
            .get_order_with_items(order_id)
            .await
            .map_err(OrderError::Persistence)?
            .ok_or(OrderError::NotFound(order_id))
    }

    async fn write_if_status(&self, next: &Order, expected: OrderStatus) -> Result<(), OrderError> {
        let applied = self
            .orders
            .update_order_if_status(next, expected)
            .await
            .map_err(OrderError::Persistence)?;

        if applied {
            Ok(())
        } else {
            tracing::warn!(order_id = %next.id, expected = %expected, "Order changed underneath status update");
            Err(OrderError::ConcurrentModification(next.id))
        }
    }
}
