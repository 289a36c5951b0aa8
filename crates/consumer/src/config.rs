//! Queue configuration loaded from environment variables.

use std::time::Duration;

use common::Backoff;

/// Connection and subscription settings for the order consumer.
///
/// Reads from environment variables:
/// - `NATS_URL` (default: `"nats://localhost:4222"`)
/// - `ORDERS_STREAM` / `ORDERS_SUBJECT` (default: `"ORDERS"` / `"orders"`)
/// - `ORDERS_CONSUMER` durable consumer name (default: `"inventory"`)
/// - `ORDERS_DLQ_STREAM` / `ORDERS_DLQ_SUBJECT` (default: `"ORDERS_DLQ"` / `"orders.dlq"`)
/// - `ORDERS_MAX_DELIVER` (default: `5`)
/// - `ORDERS_RETRY_DELAY_MS` redelivery delay after a transient failure (default: `1000`)
/// - `CONSUMER_ENABLED` (default: `true`)
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub nats_url: String,
    pub stream: String,
    pub subject: String,
    pub consumer_name: String,
    pub dlq_stream: String,
    pub dlq_subject: String,
    pub max_deliver: i64,
    pub retry_delay: Duration,
    pub reconnect: Backoff,
    pub enabled: bool,
}

impl ConsumerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            nats_url: env_or("NATS_URL", defaults.nats_url),
            stream: env_or("ORDERS_STREAM", defaults.stream),
            subject: env_or("ORDERS_SUBJECT", defaults.subject),
            consumer_name: env_or("ORDERS_CONSUMER", defaults.consumer_name),
            dlq_stream: env_or("ORDERS_DLQ_STREAM", defaults.dlq_stream),
            dlq_subject: env_or("ORDERS_DLQ_SUBJECT", defaults.dlq_subject),
            max_deliver: std::env::var("ORDERS_MAX_DELIVER")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_deliver),
            retry_delay: std::env::var("ORDERS_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            reconnect: defaults.reconnect,
            enabled: std::env::var("CONSUMER_ENABLED")
                .ok()
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.enabled),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            stream: "ORDERS".to_string(),
            subject: "orders".to_string(),
            consumer_name: "inventory".to_string(),
            dlq_stream: "ORDERS_DLQ".to_string(),
            dlq_subject: "orders.dlq".to_string(),
            max_deliver: 5,
            retry_delay: Duration::from_secs(1),
            reconnect: Backoff::new(Duration::from_millis(500), Duration::from_secs(30)),
            enabled: true,
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
