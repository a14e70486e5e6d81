// ============================================================================
// Notification Dispatch
// ============================================================================
//
// Outbound "new order" alerts. Delivery is best effort: the engine spawns the
// call after the order is committed and only logs failures.
//
// ============================================================================

mod redpanda;

pub use redpanda::RedpandaNotifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderNotification {
    pub order_id: Uuid,
    pub amount: i64,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification channel unavailable")]
    Unavailable,

    #[error("Failed to encode notification: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_order_notification(&self, notification: &OrderNotification) -> Result<(), NotificationError>;
}

/// Dispatcher used when no broker is configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn send_order_notification(&self, notification: &OrderNotification) -> Result<(), NotificationError> {
        tracing::info!(
            order_id = %notification.order_id,
            amount = notification.amount,
            customer = ?notification.customer_name,
            phone = ?notification.customer_phone,
            "New order notification"
        );
        Ok(())
    }
}
