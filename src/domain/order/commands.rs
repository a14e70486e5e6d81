use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::OrderError;

// ============================================================================
// Checkout Command - Cart handed over by the storefront
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutPayload {
    pub user_id: Uuid,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub shipping_phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub title: String,
    pub price: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    pub size: String,
    #[serde(default)]
    pub color: Option<String>,
    pub quantity: i32,
}

/// A checkout that passed validation. Only the engine builds these.
#[derive(Debug, Clone)]
pub struct ValidatedCart {
    pub user_id: Uuid,
    pub customer_name: Option<String>,
    pub lines: Vec<CartLine>,
    pub shipping_address: Option<String>,
    pub shipping_phone: Option<String>,
    pub notes: Option<String>,
    pub total_amount: i64,
}

impl CheckoutPayload {
    pub fn validate(self) -> Result<ValidatedCart, OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::Validation("cart is empty".to_string()));
        }

        let mut lines = Vec::with_capacity(self.items.len());
        for (index, line) in self.items.into_iter().enumerate() {
            if line.quantity <= 0 {
                return Err(OrderError::Validation(format!(
                    "item {} has invalid quantity {}",
                    index, line.quantity
                )));
            }
            if line.price < 0 {
                return Err(OrderError::Validation(format!(
                    "item {} has negative price {}",
                    index, line.price
                )));
            }
            let size = line.size.trim().to_string();
            if size.is_empty() {
                return Err(OrderError::Validation(format!("item {} has no size", index)));
            }
            let title = line.title.trim().to_string();
            if title.is_empty() {
                return Err(OrderError::Validation(format!("item {} has no title", index)));
            }

            lines.push(CartLine {
                size,
                title,
                color: non_blank(line.color),
                image_url: non_blank(line.image_url),
                ..line
            });
        }

        let total_amount = lines
            .iter()
            .map(|line| line.price * i64::from(line.quantity))
            .sum();

        Ok(ValidatedCart {
            user_id: self.user_id,
            customer_name: non_blank(self.customer_name),
            lines,
            shipping_address: non_blank(self.shipping_address),
            shipping_phone: non_blank(self.shipping_phone),
            notes: non_blank(self.notes),
            total_amount,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
