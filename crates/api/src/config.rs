//! Application configuration loaded from environment variables.

use std::time::Duration;

use consumer::ConsumerConfig;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` `text` or `json` (default: `text`)
/// - `DATABASE_URL` Postgres connection string; unset selects the in-memory store
/// - `DATABASE_MAX_CONNECTIONS` pool size (default: `10`)
/// - `STORE_TIMEOUT_MS` per store call timeout (default: `2000`)
/// - `STORE_MAX_ATTEMPTS` attempts for transient store failures (default: `3`)
///
/// Queue settings are read by [`ConsumerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub store_timeout: Duration,
    pub store_max_attempts: u32,
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.database_max_connections),
            store_timeout: parsed("STORE_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            store_max_attempts: parsed("STORE_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.store_max_attempts),
            consumer: ConsumerConfig::from_env(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            store_timeout: Duration::from_millis(2000),
            store_max_attempts: 3,
            consumer: ConsumerConfig::default(),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.store_timeout, Duration::from_secs(2));
        assert_eq!(config.store_max_attempts, 3);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_addr_default() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
    }
}
