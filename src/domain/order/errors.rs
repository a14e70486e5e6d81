use uuid::Uuid;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid checkout: {0}")]
    Validation(String),

    #[error("Duplicate of order {existing_order_id} placed moments ago")]
    DuplicateOrder { existing_order_id: Uuid },

    #[error("Failed to persist order: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("Order {order_id} was rolled back after its items failed to persist: {source}")]
    PartialFailure {
        order_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Order {0} has been deleted")]
    OrderDeleted(Uuid),

    #[error("Cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order {0} was modified concurrently, reload and retry")]
    ConcurrentModification(Uuid),
}

impl OrderError {
    /// Sentence shown to the shopper or admin when the operation fails.
    pub fn user_message(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "Your cart contains invalid items. Please review it and try again.",
            OrderError::DuplicateOrder { .. } => {
                "This order was just placed. Please wait a few seconds before ordering again."
            }
            OrderError::Persistence(_) | OrderError::PartialFailure { .. } => {
                "We could not save your order. No order was placed, please try again."
            }
            OrderError::NotFound(_) | OrderError::OrderDeleted(_) => "This order no longer exists.",
            OrderError::InvalidStatusTransition { .. } => "This status change is not allowed for the order.",
            OrderError::ConcurrentModification(_) => {
                "The order was changed by someone else. Refresh and try again."
            }
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "validation",
            OrderError::DuplicateOrder { .. } => "duplicate",
            OrderError::Persistence(_) => "persistence",
            OrderError::PartialFailure { .. } => "partial_failure",
            OrderError::NotFound(_) => "not_found",
            OrderError::OrderDeleted(_) => "deleted",
            OrderError::InvalidStatusTransition { .. } => "invalid_transition",
            OrderError::ConcurrentModification(_) => "concurrent_modification",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_failures_ask_to_retry() {
        let errors = [
            OrderError::Persistence(anyhow::anyhow!("timeout")),
            OrderError::PartialFailure {
                order_id: Uuid::new_v4(),
                source: anyhow::anyhow!("items"),
            },
        ];
        for e in &errors {
            assert!(e.user_message().contains("No order was placed"));
        }
        assert_eq!(errors[0].kind(), "persistence");
        assert_eq!(errors[1].kind(), "partial_failure");
    }

    #[test]
    fn test_duplicate_asks_to_wait() {
        let e = OrderError::DuplicateOrder { existing_order_id: Uuid::new_v4() };
        assert!(e.user_message().contains("wait"));
        assert_eq!(e.kind(), "duplicate");
    }

    #[test]
    fn test_validation_message() {
        let e = OrderError::Validation("cart is empty".to_string());
        assert!(e.user_message().contains("invalid items"));
        assert!(e.to_string().contains("cart is empty"));
    }

    #[test]
    fn test_missing_and_deleted_orders_share_a_message() {
        let id = Uuid::new_v4();
        assert_eq!(
            OrderError::NotFound(id).user_message(),
            OrderError::OrderDeleted(id).user_message()
        );
        assert_eq!(OrderError::OrderDeleted(id).kind(), "deleted");
    }

    #[test]
    fn test_back_office_conflicts() {
        let transition = OrderError::InvalidStatusTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Pending,
        };
        assert!(transition.user_message().contains("not allowed"));
        assert!(transition.to_string().contains("delivered"));

        let concurrent = OrderError::ConcurrentModification(Uuid::new_v4());
        assert!(concurrent.user_message().contains("Refresh"));
        assert_eq!(concurrent.kind(), "concurrent_modification");
    }
}
