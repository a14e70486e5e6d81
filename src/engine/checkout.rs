use chrono::{DateTime, Utc};

use crate::domain::order::{CheckoutPayload, Order, OrderError};
use crate::notify::OrderNotification;
use super::OrderEngine;

impl OrderEngine {
    pub async fn create_order(&self, payload: CheckoutPayload) -> Result<Order, OrderError> {
        self.create_order_at(payload, Utc::now()).await
    }

    /// Checkout with a caller-supplied clock. The order is durable before
    /// stock is touched; stock failures never undo it.
    pub async fn create_order_at(&self, payload: CheckoutPayload, now: DateTime<Utc>) -> Result<Order, OrderError> {
        let user_id = payload.user_id;

        match self.place_order(payload, now).await {
            Ok(order) => {
                self.metrics.orders_created.inc();
                Ok(order)
            }
            Err(e) => {
                self.metrics.record_rejection(e.kind());
                tracing::warn!(
                    user_id = %user_id,
                    reason = e.kind(),
                    error = %e,
                    user_message = e.user_message(),
                    "Checkout rejected"
                );
                Err(e)
            }
        }
    }

    async fn place_order(&self, payload: CheckoutPayload, now: DateTime<Utc>) -> Result<Order, OrderError> {
        let cart = payload.validate()?;

        self.duplicates
            .check(cart.user_id, cart.total_amount, cart.shipping_phone.as_deref(), now)
            .await?;

        let placed = self.writer.write(cart, now).await?;

        let report = self.inventory.decrement(&placed.items).await;
        if !report.is_complete() {
            tracing::warn!(
                order_id = %placed.order.id,
                decremented = report.applied,
                failed = report.failures.len(),
                "Order placed with stale inventory"
            );
        }

        self.spawn_notification(&placed.order);
        Ok(placed.order)
    }

    fn spawn_notification(&self, order: &Order) {
        let notification = OrderNotification {
            order_id: order.id,
            amount: order.total_amount,
            customer_name: order.customer_name.clone(),
            customer_phone: order.shipping_phone.clone(),
        };
        let notifier = self.notifier.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            match notifier.send_order_notification(&notification).await {
                Ok(()) => metrics.record_notification(true),
                Err(e) => {
                    tracing::warn!(order_id = %notification.order_id, error = %e, "Order notification not delivered");
                    metrics.record_notification(false);
                }
            }
        });
    }
}
