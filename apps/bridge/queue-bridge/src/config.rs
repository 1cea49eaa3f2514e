use crate::buffer::{OverflowPolicy, DEFAULT_BUFFER_CAPACITY};
use crate::drain::RESPONSE_QUEUE;
use crate::session::{StreamSettings, DEFAULT_STREAM_QUEUE};
use core_config::broker::BrokerConfig;
use core_config::server::ServerConfig;
use core_config::{env_or_default, env_parse_or, ConfigError, Environment, FromEnv};

pub const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Everything the bridge process reads from its environment.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    /// Queue streamed to TCP clients
    pub stream_queue: String,
    /// Queue observed by the response drain
    pub response_queue: String,
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub health_port: u16,
}

impl BridgeConfig {
    /// Session settings with the default 1 s idle poll and 2 s pacing.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings::new(&self.stream_queue)
            .with_buffer(self.buffer_capacity, self.overflow_policy)
    }
}

impl FromEnv for BridgeConfig {
    /// Reads from environment variables with defaults:
    /// - STREAM_QUEUE: test_queue
    /// - RESPONSE_QUEUE: response_queue
    /// - BUFFER_CAPACITY: 10000
    /// - BUFFER_OVERFLOW: drop_oldest
    /// - HEALTH_PORT: 8081
    ///
    /// plus everything [`ServerConfig`] and [`BrokerConfig`] read.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?,
            broker: BrokerConfig::from_env()?,
            stream_queue: env_or_default("STREAM_QUEUE", DEFAULT_STREAM_QUEUE),
            response_queue: env_or_default("RESPONSE_QUEUE", RESPONSE_QUEUE),
            buffer_capacity: env_parse_or("BUFFER_CAPACITY", DEFAULT_BUFFER_CAPACITY)?,
            overflow_policy: env_parse_or("BUFFER_OVERFLOW", OverflowPolicy::DropOldest)?,
            health_port: env_parse_or("HEALTH_PORT", DEFAULT_HEALTH_PORT)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRIDGE_VARS: [&str; 5] = [
        "STREAM_QUEUE",
        "RESPONSE_QUEUE",
        "BUFFER_CAPACITY",
        "BUFFER_OVERFLOW",
        "HEALTH_PORT",
    ];

    #[test]
    fn test_bridge_config_defaults() {
        temp_env::with_vars_unset(BRIDGE_VARS, || {
            let config = BridgeConfig::from_env().unwrap();
            assert_eq!(config.stream_queue, "test_queue");
            assert_eq!(config.response_queue, "response_queue");
            assert_eq!(config.buffer_capacity, 10_000);
            assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
            assert_eq!(config.health_port, 8081);
        });
    }

    #[test]
    fn test_bridge_config_custom_values() {
        temp_env::with_vars(
            [
                ("STREAM_QUEUE", Some("orders")),
                ("RESPONSE_QUEUE", Some("orders_replies")),
                ("BUFFER_CAPACITY", Some("64")),
                ("BUFFER_OVERFLOW", Some("drop-newest")),
                ("HEALTH_PORT", Some("9100")),
            ],
            || {
                let config = BridgeConfig::from_env().unwrap();
                assert_eq!(config.response_queue, "orders_replies");
                assert_eq!(config.health_port, 9100);

                let settings = config.stream_settings();
                assert_eq!(settings.queue_name, "orders");
                assert_eq!(settings.buffer_capacity, 64);
                assert_eq!(settings.overflow_policy, OverflowPolicy::DropNewest);
            },
        );
    }

    #[test]
    fn test_bridge_config_rejects_unknown_overflow_policy() {
        temp_env::with_var("BUFFER_OVERFLOW", Some("block"), || {
            let err = BridgeConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("BUFFER_OVERFLOW"));
        });
    }
}
