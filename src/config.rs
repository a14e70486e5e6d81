use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::RetryConfig;

/// Which storage backend the binary wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Scylla,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scylla" => Ok(StoreBackend::Scylla),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("Unknown store backend: {}", other),
        }
    }
}

/// Knobs the order engine itself reads.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How far back the duplicate suppressor looks
    pub duplicate_window: Duration,
    /// Retry policy for conditional stock writes
    pub inventory_retry: RetryConfig,
    /// Audit lower bound used until an admin rebases it
    pub default_reference_epoch: DateTime<Utc>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            duplicate_window: Duration::from_secs(10),
            inventory_retry: RetryConfig::fixed(3, Duration::from_millis(100)),
            // 2024-01-01T00:00:00Z
            default_reference_epoch: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(19_723),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub scylla_nodes: Vec<String>,
    pub scylla_keyspace: String,
    /// No brokers means notifications are only logged
    pub redpanda_brokers: Option<String>,
    pub notification_topic: String,
    pub metrics_port: u16,
    pub engine: EngineConfig,
}

impl Config {
    /// Load settings from `.env` (if present) and the process environment.
    ///
    /// - STORE_BACKEND (default: scylla)
    /// - SCYLLA_NODES (default: 127.0.0.1:9042, comma separated)
    /// - SCYLLA_KEYSPACE (default: storefront_ks)
    /// - REDPANDA_BROKERS (optional)
    /// - NOTIFICATION_TOPIC (default: order-notifications)
    /// - METRICS_PORT (default: 9090)
    /// - DUPLICATE_WINDOW_SECS (default: 10)
    /// - INVENTORY_MAX_ATTEMPTS (default: 3)
    /// - INVENTORY_BACKOFF_MS (default: 100)
    /// - DEFAULT_REFERENCE_EPOCH (default: 2024-01-01T00:00:00Z)
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let max_attempts: u32 = parse_or(&lookup, "INVENTORY_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            bail!("INVENTORY_MAX_ATTEMPTS must be at least 1");
        }
        let backoff_ms: u64 = parse_or(&lookup, "INVENTORY_BACKOFF_MS", 100)?;

        let default_reference_epoch = match lookup("DEFAULT_REFERENCE_EPOCH") {
            Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
                .with_context(|| format!("DEFAULT_REFERENCE_EPOCH is not RFC 3339: {}", raw))?
                .with_timezone(&Utc),
            None => defaults.default_reference_epoch,
        };

        let scylla_nodes: Vec<String> = lookup("SCYLLA_NODES")
            .unwrap_or_else(|| "127.0.0.1:9042".to_string())
            .split(',')
            .map(|node| node.trim().to_string())
            .filter(|node| !node.is_empty())
            .collect();
        if scylla_nodes.is_empty() {
            bail!("SCYLLA_NODES must name at least one node");
        }

        Ok(Self {
            store_backend: parse_or(&lookup, "STORE_BACKEND", StoreBackend::Scylla)?,
            scylla_nodes,
            scylla_keyspace: lookup("SCYLLA_KEYSPACE").unwrap_or_else(|| "storefront_ks".to_string()),
            redpanda_brokers: lookup("REDPANDA_BROKERS").filter(|b| !b.trim().is_empty()),
            notification_topic: lookup("NOTIFICATION_TOPIC")
                .unwrap_or_else(|| "order-notifications".to_string()),
            metrics_port: parse_or(&lookup, "METRICS_PORT", 9090)?,
            engine: EngineConfig {
                duplicate_window: Duration::from_secs(parse_or(&lookup, "DUPLICATE_WINDOW_SECS", 10)?),
                inventory_retry: RetryConfig::fixed(max_attempts, Duration::from_millis(backoff_ms)),
                default_reference_epoch,
            },
        })
    }
}

/// Parse `key` if set, otherwise use `default`. A set but malformed value is an error.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.store_backend, StoreBackend::Scylla);
        assert_eq!(config.scylla_nodes, vec!["127.0.0.1:9042".to_string()]);
        assert_eq!(config.scylla_keyspace, "storefront_ks");
        assert!(config.redpanda_brokers.is_none());
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.engine.duplicate_window, Duration::from_secs(10));
        assert_eq!(config.engine.inventory_retry.max_attempts, 3);
        assert_eq!(config.engine.inventory_retry.initial_delay, Duration::from_millis(100));
        assert_eq!(config.engine.default_reference_epoch.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("STORE_BACKEND", "memory"),
            ("SCYLLA_NODES", "10.0.0.1:9042, 10.0.0.2:9042"),
            ("REDPANDA_BROKERS", "127.0.0.1:9092"),
            ("DUPLICATE_WINDOW_SECS", "30"),
            ("INVENTORY_MAX_ATTEMPTS", "5"),
            ("DEFAULT_REFERENCE_EPOCH", "2025-03-01T00:00:00Z"),
        ])
        .unwrap();

        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.scylla_nodes.len(), 2);
        assert_eq!(config.redpanda_brokers.as_deref(), Some("127.0.0.1:9092"));
        assert_eq!(config.engine.duplicate_window, Duration::from_secs(30));
        assert_eq!(config.engine.inventory_retry.max_attempts, 5);
        assert_eq!(config.engine.default_reference_epoch.to_rfc3339(), "2025-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert!(load(&[("METRICS_PORT", "ninety")]).is_err());
        assert!(load(&[("STORE_BACKEND", "postgres")]).is_err());
        assert!(load(&[("DEFAULT_REFERENCE_EPOCH", "yesterday")]).is_err());
        assert!(load(&[("INVENTORY_MAX_ATTEMPTS", "0")]).is_err());
    }
}
