//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use service::{DEFAULT_TOPIC, DispatcherConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `DB_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `ORDER_EVENTS_TOPIC`: topic for status events (default: `"loms.order-events"`)
/// - `OUTBOX_IDLE_INTERVAL_MS`: dispatcher wait on an empty outbox (default: `1000`)
/// - `STOCK_SEED_PATH`: JSON file with initial stock (default: bundled stock)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub order_events_topic: String,
    pub outbox_idle_interval: Duration,
    pub stock_seed_path: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: non_empty("DB_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.db_max_connections),
            order_events_topic: non_empty("ORDER_EVENTS_TOPIC")
                .unwrap_or(defaults.order_events_topic),
            outbox_idle_interval: non_empty("OUTBOX_IDLE_INTERVAL_MS")
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_idle_interval),
            stock_seed_path: non_empty("STOCK_SEED_PATH").map(PathBuf::from),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the outbox dispatcher.
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            topic: self.order_events_topic.clone(),
            idle_interval: self.outbox_idle_interval,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            db_max_connections: 10,
            order_events_topic: DEFAULT_TOPIC.to_string(),
            outbox_idle_interval: Duration::from_secs(1),
            stock_seed_path: None,
        }
    }
}
