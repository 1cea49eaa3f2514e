use crate::{env_or_default, env_parse_or, ConfigError, FromEnv};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_ACCEPT_TIMEOUT_MS: u64 = 30_000;

/// What the stream server does with its listening socket after the first client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcceptMode {
    /// One client per `up_server` call; the socket is released afterwards.
    #[default]
    Single,
    /// Keep accepting in the background, one streaming session per client.
    Persistent,
}

impl FromStr for AcceptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(AcceptMode::Single),
            "persistent" => Ok(AcceptMode::Persistent),
            other => Err(format!(
                "unknown accept mode '{}', expected 'single' or 'persistent'",
                other
            )),
        }
    }
}

impl fmt::Display for AcceptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptMode::Single => write!(f, "single"),
            AcceptMode::Persistent => write!(f, "persistent"),
        }
    }
}

/// Rejection reasons for a [`ServerConfig`], checked before any socket is bound.
///
/// The display strings are the messages reported back to callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerConfigError {
    #[error("Host cannot be null or empty.")]
    EmptyHost,

    #[error("Port is not specified.")]
    MissingPort,

    #[error("Invalid host address.")]
    InvalidHost(String),
}

/// TCP stream server configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Accept attempts before `up_server` gives up
    pub max_connect_attempts: u32,
    /// Pause between failed accept attempts
    pub reconnect_delay_ms: u64,
    /// How long a single accept attempt waits; 0 only takes an already pending client
    pub accept_timeout_ms: u64,
    pub accept_mode: AcceptMode,
}

impl ServerConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        max_connect_attempts: u32,
        reconnect_delay_ms: u64,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            max_connect_attempts,
            reconnect_delay_ms,
            accept_timeout_ms: DEFAULT_ACCEPT_TIMEOUT_MS,
            accept_mode: AcceptMode::Single,
        }
    }

    pub fn with_accept_timeout_ms(mut self, accept_timeout_ms: u64) -> Self {
        self.accept_timeout_ms = accept_timeout_ms;
        self
    }

    pub fn with_accept_mode(mut self, accept_mode: AcceptMode) -> Self {
        self.accept_mode = accept_mode;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    /// Check host and port and resolve the address to bind.
    ///
    /// Checks run in a fixed order: empty host, zero port, unparseable host.
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ServerConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ServerConfigError::MissingPort);
        }
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ServerConfigError::InvalidHost(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl FromEnv for ServerConfig {
    /// Reads from environment variables with defaults:
    /// - HOST: 0.0.0.0
    /// - PORT: 5000
    /// - MAX_CONNECT_ATTEMPTS: 3
    /// - RECONNECT_DELAY_MS: 1000
    /// - ACCEPT_TIMEOUT_MS: 30000
    /// - ACCEPT_MODE: single
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string()),
            port: env_parse_or("PORT", DEFAULT_PORT)?,
            max_connect_attempts: env_parse_or(
                "MAX_CONNECT_ATTEMPTS",
                DEFAULT_MAX_CONNECT_ATTEMPTS,
            )?,
            reconnect_delay_ms: env_parse_or("RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)?,
            accept_timeout_ms: env_parse_or("ACCEPT_TIMEOUT_MS", DEFAULT_ACCEPT_TIMEOUT_MS)?,
            accept_mode: env_parse_or("ACCEPT_MODE", AcceptMode::Single)?,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(
            Ipv4Addr::UNSPECIFIED.to_string(),
            DEFAULT_PORT,
            DEFAULT_MAX_CONNECT_ATTEMPTS,
            DEFAULT_RECONNECT_DELAY_MS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_VARS: [&str; 6] = [
        "HOST",
        "PORT",
        "MAX_CONNECT_ATTEMPTS",
        "RECONNECT_DELAY_MS",
        "ACCEPT_TIMEOUT_MS",
        "ACCEPT_MODE",
    ];

    #[test]
    fn test_server_config_from_env_with_defaults() {
        temp_env::with_vars_unset(SERVER_VARS, || {
            let config = ServerConfig::from_env().unwrap();
            assert_eq!(config, ServerConfig::default());
            assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:5000");
        });
    }

    #[test]
    fn test_server_config_from_env_with_custom_values() {
        temp_env::with_vars(
            [
                ("HOST", Some("127.0.0.1")),
                ("PORT", Some("6001")),
                ("MAX_CONNECT_ATTEMPTS", Some("5")),
                ("RECONNECT_DELAY_MS", Some("250")),
                ("ACCEPT_TIMEOUT_MS", Some("0")),
                ("ACCEPT_MODE", Some("Persistent")),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config.host, "127.0.0.1");
                assert_eq!(config.port, 6001);
                assert_eq!(config.max_connect_attempts, 5);
                assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
                assert_eq!(config.accept_timeout(), Duration::ZERO);
                assert_eq!(config.accept_mode, AcceptMode::Persistent);
            },
        );
    }

    #[test]
    fn test_server_config_from_env_port_out_of_range() {
        temp_env::with_var("PORT", Some("99999"), || {
            let err = ServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("PORT"));
        });
    }

    #[test]
    fn test_server_config_from_env_unknown_accept_mode() {
        temp_env::with_var("ACCEPT_MODE", Some("broadcast"), || {
            let err = ServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("ACCEPT_MODE"));
        });
    }

    #[test]
    fn test_socket_addr_valid() {
        let config = ServerConfig::new("127.0.0.1", 5000, 3, 100);
        assert_eq!(
            config.socket_addr().unwrap(),
            "127.0.0.1:5000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_socket_addr_accepts_ipv6() {
        let config = ServerConfig::new("::1", 5000, 3, 100);
        assert!(config.socket_addr().unwrap().is_ipv6());
    }

    #[test]
    fn test_socket_addr_rejects_empty_host_first() {
        let config = ServerConfig::new("   ", 0, 3, 100);
        assert_eq!(config.socket_addr(), Err(ServerConfigError::EmptyHost));
    }

    #[test]
    fn test_socket_addr_rejects_zero_port() {
        let config = ServerConfig::new("127.0.0.1", 0, 3, 100);
        let err = config.socket_addr().unwrap_err();
        assert_eq!(err, ServerConfigError::MissingPort);
        assert!(err.to_string().contains("Port"));
    }

    #[test]
    fn test_socket_addr_rejects_hostname() {
        let config = ServerConfig::new("localhost", 5000, 3, 100);
        assert_eq!(
            config.socket_addr(),
            Err(ServerConfigError::InvalidHost("localhost".to_string()))
        );
    }
}
