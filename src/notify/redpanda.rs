use anyhow::Result;
use async_trait::async_trait;
use rdkafka::{
    producer::{FutureProducer, FutureRecord},
    config::ClientConfig,
};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;
use crate::utils::{retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RetryConfig};
use super::{NotificationDispatcher, NotificationError, OrderNotification};

/// Publishes order notifications to a Redpanda topic; the SMS/email gateway
/// consumes from there.
pub struct RedpandaNotifier {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl RedpandaNotifier {
    pub fn new(brokers: &str, topic: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            topic: topic.to_string(),
            circuit_breaker: CircuitBreaker::new(cb_config),
            metrics,
        })
    }

    async fn publish(&self, key: &str, payload: &str) -> Result<(), NotificationError> {
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(&self.topic).key(key).payload(payload);

                self.producer
                    .send(record, Duration::from_secs(5))
                    .await
                    .map_err(|(e, _)| NotificationError::Delivery(e.to_string()))
            })
            .await;

        self.metrics
            .update_circuit_breaker_state(self.circuit_breaker.state().await.as_gauge());

        match result {
            Ok(_) => {
                tracing::debug!(topic = %self.topic, key = %key, "Published order notification");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => Err(NotificationError::Unavailable),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RedpandaNotifier {
    async fn send_order_notification(&self, notification: &OrderNotification) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(notification)?;
        let key = notification.order_id.to_string();
        let (key, payload) = (key.as_str(), payload.as_str());

        retry_with_backoff(RetryConfig::conservative(), move |_attempt| self.publish(key, payload))
            .await
            .into_result()
    }
}
