use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::order::{Order, OrderError};
use crate::store::OrderStore;

/// Rejects a checkout that repeats one the same user placed moments ago.
///
/// This is a heuristic over recent rows, not a lock: two submissions racing
/// each other can both get through.
pub struct DuplicateSuppressor {
    orders: Arc<dyn OrderStore>,
    window: Duration,
}

impl DuplicateSuppressor {
    pub fn new(orders: Arc<dyn OrderStore>, window: Duration) -> Self {
        Self { orders, window }
    }

    pub async fn check(
        &self,
        user_id: Uuid,
        total_amount: i64,
        shipping_phone: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let since = now - chrono::Duration::milliseconds(self.window.as_millis() as i64);

        let recent = match self.orders.recent_orders_for_user(user_id, since).await {
            Ok(recent) => recent,
            Err(e) => {
                // Lookup failure must not block checkout
                tracing::warn!(user_id = %user_id, error = %e, "Duplicate check skipped");
                return Ok(());
            }
        };

        let phone = normalize_phone(shipping_phone);
        match recent.iter().find(|o| is_repeat(o, total_amount, phone)) {
            Some(existing) => {
                tracing::info!(
                    user_id = %user_id,
                    existing_order_id = %existing.id,
                    total_amount = total_amount,
                    "Rejected duplicate checkout"
                );
                Err(OrderError::DuplicateOrder { existing_order_id: existing.id })
            }
            None => Ok(()),
        }
    }
}

fn is_repeat(order: &Order, total_amount: i64, phone: Option<&str>) -> bool {
    order.total_amount == total_amount && normalize_phone(order.shipping_phone.as_deref()) == phone
}

fn normalize_phone(phone: Option<&str>) -> Option<&str> {
    phone.map(str::trim).filter(|p| !p.is_empty())
}
