//! Service configuration loaded from environment variables.

use std::time::Duration;

use common::{JwtConfig, LogFormat};

/// Sales service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `5002`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for structured output, anything else for text
/// - `DATABASE_URL`: PostgreSQL order ledger; absent means in-memory
/// - `AMQP_URL`: RabbitMQ broker; absent means in-process broker
/// - `INVENTORY_BASE_URL`: inventory service (default: `"http://localhost:5001"`)
/// - `INVENTORY_TIMEOUT_SECS`: per-request bound (default: `30`)
/// - `INVENTORY_SERVICE_TOKEN`: bearer token for inventory calls; absent
///   means one is minted with the shared secret
/// - `JWT_SECRET`, `JWT_ISSUER`, `JWT_TTL_SECS`: token verification
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub amqp_url: Option<String>,
    pub inventory_base_url: String,
    pub inventory_timeout_secs: u64,
    pub inventory_service_token: Option<String>,
    pub jwt: JwtConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: LogFormat::from_env(),
            database_url: non_empty_var("DATABASE_URL"),
            amqp_url: non_empty_var("AMQP_URL"),
            inventory_base_url: non_empty_var("INVENTORY_BASE_URL")
                .unwrap_or(defaults.inventory_base_url),
            inventory_timeout_secs: std::env::var("INVENTORY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.inventory_timeout_secs),
            inventory_service_token: non_empty_var("INVENTORY_SERVICE_TOKEN"),
            jwt: JwtConfig::from_env(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn inventory_timeout(&self) -> Duration {
        Duration::from_secs(self.inventory_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5002,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            amqp_url: None,
            inventory_base_url: "http://localhost:5001".to_string(),
            inventory_timeout_secs: 30,
            inventory_service_token: None,
            jwt: JwtConfig::default(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
