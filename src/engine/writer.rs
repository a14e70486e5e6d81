use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::order::{CartLine, Order, OrderError, OrderItem, OrderStatus, ValidatedCart};
use crate::metrics::Metrics;
use crate::store::OrderStore;

/// An order as committed, with the items that were written for it.
///
/// `order.items` reflects the post-write re-fetch and may be empty when that
/// read failed; `items` is always what was persisted.
#[derive(Debug, Clone)]
pub struct PersistedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Persists an order and its items as one logical unit.
pub struct OrderWriter {
    orders: Arc<dyn OrderStore>,
    metrics: Arc<Metrics>,
}

impl OrderWriter {
    pub fn new(orders: Arc<dyn OrderStore>, metrics: Arc<Metrics>) -> Self {
        Self { orders, metrics }
    }

    pub async fn write(&self, cart: ValidatedCart, now: DateTime<Utc>) -> Result<PersistedOrder, OrderError> {
        let order_id = Uuid::new_v4();
        let items: Vec<OrderItem> = cart.lines.iter().map(|line| item_for(order_id, line)).collect();

        let order = Order {
            id: order_id,
            user_id: cart.user_id,
            total_amount: cart.total_amount,
            status: OrderStatus::Pending,
            customer_name: cart.customer_name,
            shipping_address: cart.shipping_address,
            shipping_phone: cart.shipping_phone,
            notes: cart.notes,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            inventory_restored: false,
            items: Vec::new(),
        };

        if self.orders.supports_atomic_writes() {
            self.orders
                .insert_order_with_items(&order, &items)
                .await
                .map_err(OrderError::Persistence)?;
        } else {
            self.write_with_compensation(&order, &items).await?;
        }

        tracing::info!(
            order_id = %order_id,
            user_id = %order.user_id,
            total_amount = order.total_amount,
            items = items.len(),
            "Order persisted"
        );

        let order = self.refetch(order).await;
        Ok(PersistedOrder { order, items })
    }

    /// Order row first, then its items. If the items fail the order row is
    /// deleted again so no order without items survives.
    async fn write_with_compensation(&self, order: &Order, items: &[OrderItem]) -> Result<(), OrderError> {
        self.orders.insert_order(order).await.map_err(OrderError::Persistence)?;

        let Err(source) = self.orders.insert_items(items).await else {
            return Ok(());
        };

        tracing::warn!(order_id = %order.id, error = %source, "Item insert failed, rolling back order");
        self.metrics.order_rollbacks.inc();

        if let Err(e) = self.orders.delete_order(order.id).await {
            tracing::error!(
                order_id = %order.id,
                error = %e,
                "Compensating delete failed, order row left without items"
            );
        }

        Err(OrderError::PartialFailure { order_id: order.id, source })
    }

    async fn refetch(&self, order: Order) -> Order {
        match self.orders.get_order_with_items(order.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::warn!(order_id = %order.id, "Order missing on re-fetch, returning it without items");
                order
            }
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Order re-fetch failed, returning it without items");
                order
            }
        }
    }
}

fn item_for(order_id: Uuid, line: &CartLine) -> OrderItem {
    OrderItem {
        id: Uuid::new_v4(),
        order_id,
        product_id: line.product_id,
        size: line.size.clone(),
        color: line.color.clone(),
        quantity: line.quantity,
        unit_price: line.price,
        title: line.title.clone(),
        image_url: line.image_url.clone(),
    }
}
