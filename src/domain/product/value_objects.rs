use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::utils::Versioned;

/// Size label → units on hand.
pub type SizeStock = BTreeMap<String, i32>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub title: String,
    pub price: i64,
    pub sizes: SizeStock,
    pub in_stock: bool,
    /// Optimistic lock token, bumped by every stock write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(title: impl Into<String>, price: i64, sizes: SizeStock) -> Self {
        let now = Utc::now();
        let in_stock = compute_in_stock(&sizes);
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            price,
            sizes,
            in_stock,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_stock(&self) -> i64 {
        self.sizes.values().map(|&qty| i64::from(qty)).sum()
    }

    pub fn quantity_of(&self, size: &str) -> i32 {
        self.sizes.get(size).copied().unwrap_or(0)
    }

    /// Next revision with `size` lowered by `quantity`, floored at zero.
    pub fn with_decrement(&self, size: &str, quantity: i32) -> Self {
        let current = self.quantity_of(size);
        self.with_size_quantity(size, (current - quantity).max(0))
    }

    /// Next revision with `quantity` units of `size` put back.
    pub fn with_restock(&self, size: &str, quantity: i32) -> Self {
        let current = self.quantity_of(size);
        self.with_size_quantity(size, current.saturating_add(quantity).max(0))
    }

    fn with_size_quantity(&self, size: &str, quantity: i32) -> Self {
        let mut sizes = self.sizes.clone();
        // Unknown sizes are only added once they hold units
        if quantity > 0 || sizes.contains_key(size) {
            sizes.insert(size.to_string(), quantity);
        }
        let in_stock = compute_in_stock(&sizes);
        Self {
            sizes,
            in_stock,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl Versioned for Product {
    fn version(&self) -> i64 {
        self.version
    }
}

pub fn compute_in_stock(sizes: &SizeStock) -> bool {
    sizes.values().any(|&qty| qty > 0)
}

/// Stock added by an admin, as recorded by the product-management side.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StockHistoryEntry {
    pub id: Uuid,
    pub product_id: Uuid,
    pub sizes_added: SizeStock,
    pub total_added: i32,
    pub admin_id: String,
    pub created_at: DateTime<Utc>,
}

impl StockHistoryEntry {
    pub fn new(product_id: Uuid, sizes_added: SizeStock, admin_id: impl Into<String>) -> Self {
        let total_added = sizes_added.values().sum();
        Self {
            id: Uuid::new_v4(),
            product_id,
            sizes_added,
            total_added,
            admin_id: admin_id.into(),
            created_at: Utc::now(),
        }
    }
}
