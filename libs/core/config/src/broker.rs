use crate::{env_or_default, ConfigError, FromEnv};

/// Message broker (NATS) connection settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    pub url: String,
    /// Client name reported to the broker; each connection appends its own suffix
    pub connection_name: String,
}

impl FromEnv for BrokerConfig {
    /// Reads from environment variables with defaults:
    /// - NATS_URL: nats://localhost:4222
    /// - NATS_CONNECTION_NAME: queue-bridge
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_or_default("NATS_URL", "nats://localhost:4222"),
            connection_name: env_or_default("NATS_CONNECTION_NAME", "queue-bridge"),
        })
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connection_name: "queue-bridge".to_string(),
        }
    }
}
