// Private module declaration
mod server;

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the order engine
// ============================================================================
//
// Covers:
// - Checkout outcomes (orders created, rejections by reason, rollbacks)
// - Inventory CAS attempts and exhausted retries, per operation
// - Notification delivery
// - Status transitions
// - Last audit result
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Checkout
    pub orders_created: IntCounter,
    pub checkout_rejections: IntCounterVec,
    pub order_rollbacks: IntCounter,

    // Inventory
    pub inventory_cas_attempts: IntCounterVec,
    pub inventory_cas_exhausted: IntCounterVec,

    // Notifications
    pub notifications_sent: IntCounter,
    pub notifications_failed: IntCounter,
    pub circuit_breaker_state: IntGauge,

    // Back-office
    pub status_transitions: IntCounterVec,
    pub audit_anomalies: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Orders persisted by checkout")?;
        registry.register(Box::new(orders_created.clone()))?;

        let checkout_rejections = IntCounterVec::new(
            Opts::new("checkout_rejections_total", "Checkouts that did not produce an order"),
            &["reason"],
        )?;
        registry.register(Box::new(checkout_rejections.clone()))?;

        let order_rollbacks = IntCounter::new(
            "order_rollbacks_total",
            "Orders deleted again because their items failed to persist",
        )?;
        registry.register(Box::new(order_rollbacks.clone()))?;

        let inventory_cas_attempts = IntCounterVec::new(
            Opts::new("inventory_cas_attempts_total", "Conditional stock writes attempted"),
            &["operation"],
        )?;
        registry.register(Box::new(inventory_cas_attempts.clone()))?;

        let inventory_cas_exhausted = IntCounterVec::new(
            Opts::new(
                "inventory_cas_exhausted_total",
                "Stock updates abandoned after all attempts, leaving inventory stale",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(inventory_cas_exhausted.clone()))?;

        let notifications_sent = IntCounter::new("notifications_sent_total", "Order notifications delivered")?;
        registry.register(Box::new(notifications_sent.clone()))?;

        let notifications_failed = IntCounter::new("notifications_failed_total", "Order notifications dropped")?;
        registry.register(Box::new(notifications_failed.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Notification circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let status_transitions = IntCounterVec::new(
            Opts::new("order_status_transitions_total", "Order status changes applied"),
            &["from_status", "to_status"],
        )?;
        registry.register(Box::new(status_transitions.clone()))?;

        let audit_anomalies = IntGauge::new(
            "audit_anomalies",
            "Products flagged with stock drift by the last audit",
        )?;
        registry.register(Box::new(audit_anomalies.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            checkout_rejections,
            order_rollbacks,
            inventory_cas_attempts,
            inventory_cas_exhausted,
            notifications_sent,
            notifications_failed,
            circuit_breaker_state,
            status_transitions,
            audit_anomalies,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_rejection(&self, reason: &str) {
        self.checkout_rejections.with_label_values(&[reason]).inc();
    }

    pub fn record_cas(&self, operation: &str, attempts: u32, exhausted: bool) {
        self.inventory_cas_attempts
            .with_label_values(&[operation])
            .inc_by(u64::from(attempts));
        if exhausted {
            self.inventory_cas_exhausted.with_label_values(&[operation]).inc();
        }
    }

    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_sent.inc();
        } else {
            self.notifications_failed.inc();
        }
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.status_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }

    pub fn set_audit_anomalies(&self, count: usize) {
        self.audit_anomalies.set(count as i64);
    }
}
