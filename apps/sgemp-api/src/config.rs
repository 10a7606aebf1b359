//! API process configuration.
//!
//! Configuration is loaded from environment variables with fallback to defaults.

use std::path::PathBuf;
use std::str::FromStr;

use sgemp_db::SaleRole;

/// API process configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// HTTP port
    pub http_port: u16,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Back office (consumes the queue) or PDV (publishes to it)
    pub role: SaleRole,

    /// Path to bridge.toml (default: platform config dir)
    pub bridge_config_path: Option<PathBuf>,

    /// Start the consumer / outbox relay
    pub queue_enabled: bool,
}

impl ApiConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // SERVER_PORT is what existing deployments set
        let http_port = match lookup("HTTP_PORT").or_else(|| lookup("SERVER_PORT")) {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("HTTP_PORT".to_string()))?,
            None => 3001,
        };

        let role = match lookup("SGEMP_ROLE") {
            Some(role) => SaleRole::from_str(&role).map_err(ConfigError::InvalidRole)?,
            None => SaleRole::BackOffice,
        };

        let queue_enabled = match lookup("SGEMP_QUEUE_ENABLED") {
            Some(flag) => parse_flag(&flag)
                .ok_or_else(|| ConfigError::InvalidValue("SGEMP_QUEUE_ENABLED".to_string()))?,
            None => true,
        };

        Ok(ApiConfig {
            http_port,
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./sgemp.db")),
            role,
            bridge_config_path: lookup("SGEMP_BRIDGE_CONFIG").map(PathBuf::from),
            queue_enabled,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.http_port)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Invalid SGEMP_ROLE: {0}")]
    InvalidRole(String),
}
