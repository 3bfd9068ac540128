//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `DATABASE_URL` — PostgreSQL connection string; when absent the server
///   runs on the in-memory store (useful for local development only)
/// - `CART_TTL_SECS` — sliding cart TTL (default: `1800`)
/// - `RECLAIM_INTERVAL_SECS` — time between reclamation passes (default: `60`)
/// - `RECLAIM_BATCH_SIZE` — carts examined per pass (default: `100`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub cart_ttl_secs: u64,
    pub reclaim_interval_secs: u64,
    pub reclaim_batch_size: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            database_url: std::env::var("DATABASE_URL").ok(),
            cart_ttl_secs: std::env::var("CART_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cart_ttl_secs),
            reclaim_interval_secs: std::env::var("RECLAIM_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reclaim_interval_secs),
            reclaim_batch_size: std::env::var("RECLAIM_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reclaim_batch_size),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the sliding cart TTL.
    pub fn cart_ttl(&self) -> Duration {
        Duration::from_secs(self.cart_ttl_secs)
    }

    /// Returns the interval between reclamation passes.
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            cart_ttl_secs: 1800,
            reclaim_interval_secs: 60,
            reclaim_batch_size: 100,
        }
    }
}
