use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::utils::Versioned;

// ============================================================================
// Reference Epoch
// ============================================================================

/// Lower bound of every audit. One versioned row shared by all admins.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReferenceEpoch {
    pub epoch: DateTime<Utc>,
    /// 0 means nothing has been persisted yet and `epoch` is the configured default.
    pub version: i64,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ReferenceEpoch {
    pub fn installation_default(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            version: 0,
            updated_by: None,
            updated_at: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    /// The revision that replaces `self` when `admin_id` rebases to `epoch`.
    pub fn rebased(&self, epoch: DateTime<Utc>, admin_id: &str) -> Self {
        Self {
            epoch,
            version: self.version + 1,
            updated_by: Some(admin_id.to_string()),
            updated_at: Some(Utc::now()),
        }
    }
}

impl Versioned for ReferenceEpoch {
    fn version(&self) -> i64 {
        self.version
    }
}

// ============================================================================
// Audit Rows
// ============================================================================

/// Where a row's `stock_initial` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Sum of stock additions recorded since the epoch.
    StockHistory,
    /// Rebuilt as current stock plus units ordered; cannot show drift.
    Reconstructed,
}

/// Pure stock arithmetic behind one audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReconciliation {
    pub stock_initial: i64,
    pub total_ordered: i64,
    pub actual_remaining: i64,
    pub expected_remaining: i64,
    pub difference: i64,
    pub anomaly: bool,
}

impl StockReconciliation {
    pub fn compute(stock_initial: i64, total_ordered: i64, actual_remaining: i64) -> Self {
        let expected_remaining = stock_initial - total_ordered;
        let difference = actual_remaining - expected_remaining;
        Self {
            stock_initial,
            total_ordered,
            actual_remaining,
            expected_remaining,
            difference,
            anomaly: difference != 0,
        }
    }

    /// Baseline rebuilt from current stock when no history is available.
    pub fn reconstructed(current_total: i64, total_ordered: i64) -> Self {
        Self::compute(current_total + total_ordered, total_ordered, current_total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAuditRow {
    pub product_id: Uuid,
    pub title: String,
    pub baseline: BaselineSource,
    #[serde(flatten)]
    pub stock: StockReconciliation,
    pub ordered_by_size: BTreeMap<String, i64>,
    pub remaining_by_size: BTreeMap<String, i64>,
}

impl ProductAuditRow {
    pub fn is_anomalous(&self) -> bool {
        self.stock.anomaly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_stock_is_not_an_anomaly() {
        let r = StockReconciliation::compute(20, 12, 8);
        assert_eq!(r.expected_remaining, 8);
        assert_eq!(r.difference, 0);
        assert!(!r.anomaly);
    }

    #[test]
    fn test_missing_unit_is_flagged() {
        let r = StockReconciliation::compute(20, 12, 7);
        assert_eq!(r.difference, -1);
        assert!(r.anomaly);
    }

    #[test]
    fn test_reconstructed_baseline_never_drifts() {
        let r = StockReconciliation::reconstructed(8, 12);
        assert_eq!(r.stock_initial, 20);
        assert_eq!(r.difference, 0);
    }

    #[test]
    fn test_rebase_bumps_version_and_records_admin() {
        let default = ReferenceEpoch::installation_default(Utc::now());
        assert!(!default.is_persisted());

        let now = Utc::now();
        let next = default.rebased(now, "admin-7");
        assert_eq!(next.version, 1);
        assert_eq!(next.epoch, now);
        assert_eq!(next.updated_by.as_deref(), Some("admin-7"));
        assert!(next.is_persisted());
    }
}
