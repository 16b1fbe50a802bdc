//! Configuration management
//!
//! Client configuration with defaulting and validation. The transport
//! section selects the reliable-transport engine (ARQ or QUIC) and sizes the
//! connection pool; the network section describes the raw link-layer
//! endpoint and the TCP fingerprint profiles announced to the server.

use crate::pconn::TcpFingerprint;
use crate::protocol::MAX_PROFILES;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tunnel server endpoint
    pub server: ServerConfig,
    /// Transport engine selection and pool sizing
    pub transport: TransportConfig,
    /// Raw link-layer endpoint and fingerprint profiles
    pub network: NetworkConfig,
}

impl Config {
    /// Load configuration from file, apply defaults, and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()?;
        self.network.validate()?;
        Ok(())
    }
}

/// Server endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server address the multiplexed connections dial
    pub addr: SocketAddr,
}

/// Reliable-transport engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// KCP-like ARQ engine plus stream multiplexer
    #[default]
    Arq,
    /// QUIC engine
    Quic,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Engine selection
    #[serde(default)]
    pub protocol: Protocol,
    /// Number of parallel multiplexed connections (1-256)
    #[serde(default = "default_conns")]
    pub conns: usize,
    /// Maximum attempts for opening a logical stream
    #[serde(default = "default_stream_retry_limit")]
    pub stream_retry_limit: usize,
    /// Initial backoff between stream-open attempts, in milliseconds
    #[serde(default = "default_stream_retry_backoff_ms")]
    pub stream_retry_backoff_ms: u64,
    /// Seconds until a freshly dialed connection is considered due for a
    /// fingerprint re-announce
    #[serde(default = "default_auto_expire")]
    pub auto_expire: u64,
    /// Periodic fingerprint re-announce interval in seconds (disabled when
    /// unset)
    #[serde(default)]
    pub re_announce: Option<u64>,
    /// ARQ engine tuning
    #[serde(default)]
    pub arq: ArqConfig,
    /// QUIC engine tuning
    #[serde(default)]
    pub quic: QuicConfig,
}

fn default_conns() -> usize {
    1
}

fn default_stream_retry_limit() -> usize {
    5
}

fn default_stream_retry_backoff_ms() -> u64 {
    100
}

fn default_auto_expire() -> u64 {
    300
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            conns: default_conns(),
            stream_retry_limit: default_stream_retry_limit(),
            stream_retry_backoff_ms: default_stream_retry_backoff_ms(),
            auto_expire: default_auto_expire(),
            re_announce: None,
            arq: ArqConfig::default(),
            quic: QuicConfig::default(),
        }
    }
}

impl TransportConfig {
    pub fn auto_expire(&self) -> Duration {
        Duration::from_secs(self.auto_expire)
    }

    pub fn re_announce(&self) -> Option<Duration> {
        self.re_announce.map(Duration::from_secs)
    }

    pub fn stream_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.stream_retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conns < 1 || self.conns > 256 {
            return Err(ConfigError::Invalid(format!(
                "transport conns must be between 1-256 connections, got {}",
                self.conns
            )));
        }
        if self.stream_retry_limit == 0 {
            return Err(ConfigError::Invalid(
                "stream_retry_limit must be at least 1".to_string(),
            ));
        }
        if let Some(secs) = self.re_announce {
            if secs == 0 {
                return Err(ConfigError::Invalid(
                    "re_announce interval must be at least 1 second".to_string(),
                ));
            }
        }
        match self.protocol {
            Protocol::Arq => self.arq.validate(),
            Protocol::Quic => self.quic.validate(),
        }
    }
}

/// ARQ (KCP-like) engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArqConfig {
    /// Symmetric cipher applied by the engine (e.g. "aes", "none")
    pub cipher: String,
    /// Pre-shared key for the engine cipher
    #[serde(default)]
    pub key: String,
    /// FEC data shards
    pub data_shards: usize,
    /// FEC parity shards
    pub parity_shards: usize,
    /// Send window in packets
    pub send_window: u32,
    /// Receive window in packets
    pub recv_window: u32,
    /// Maximum transmission unit handed to the packet conn
    pub mtu: usize,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            cipher: "aes".to_string(),
            key: String::new(),
            data_shards: 10,
            parity_shards: 3,
            send_window: 1024,
            recv_window: 1024,
            mtu: 1350,
        }
    }
}

impl ArqConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_window < 1 || self.recv_window < 1 {
            return Err(ConfigError::Invalid(
                "ARQ windows must be at least 1 packet".to_string(),
            ));
        }
        if self.mtu < 576 || self.mtu > 1500 {
            return Err(ConfigError::Invalid(format!(
                "ARQ mtu ({}) must be between 576-1500 bytes",
                self.mtu
            )));
        }
        Ok(())
    }
}

/// QUIC engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuicConfig {
    /// Idle timeout in seconds
    pub max_idle_timeout: u64,
    /// Keep-alive period in seconds
    pub keep_alive_period: u64,
    /// Handshake idle timeout in seconds
    pub handshake_idle_timeout: u64,
    /// Initial per-stream receive window in bytes
    pub initial_stream_receive_window: u64,
    /// Maximum per-stream receive window in bytes
    pub max_stream_receive_window: u64,
    /// Initial connection receive window in bytes
    pub initial_connection_receive_window: u64,
    /// Maximum connection receive window in bytes
    pub max_connection_receive_window: u64,
    /// Maximum concurrent incoming streams
    pub max_incoming_streams: u64,
    /// Skip server certificate verification
    pub insecure: bool,
    /// Enable 0-RTT resumption
    pub allow_0rtt: bool,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            max_idle_timeout: 30,
            keep_alive_period: 10,
            handshake_idle_timeout: 5,
            initial_stream_receive_window: 2 * 1024 * 1024,
            max_stream_receive_window: 2 * 1024 * 1024,
            initial_connection_receive_window: 4 * 1024 * 1024,
            max_connection_receive_window: 4 * 1024 * 1024,
            max_incoming_streams: 1024,
            insecure: false,
            allow_0rtt: true,
        }
    }
}

impl QuicConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_idle_timeout < 1 || self.max_idle_timeout > 3600 {
            return Err(ConfigError::Invalid(format!(
                "QUIC max_idle_timeout ({}) must be between 1-3600 seconds",
                self.max_idle_timeout
            )));
        }
        if self.keep_alive_period >= self.max_idle_timeout {
            return Err(ConfigError::Invalid(format!(
                "QUIC keep_alive_period ({}) must be less than max_idle_timeout ({})",
                self.keep_alive_period, self.max_idle_timeout
            )));
        }
        if self.handshake_idle_timeout < 1 || self.handshake_idle_timeout > 300 {
            return Err(ConfigError::Invalid(format!(
                "QUIC handshake_idle_timeout ({}) must be between 1-300 seconds",
                self.handshake_idle_timeout
            )));
        }
        if self.initial_stream_receive_window < 1024
            || self.initial_connection_receive_window < 1024
        {
            return Err(ConfigError::Invalid(
                "QUIC receive windows must be at least 1024 bytes".to_string(),
            ));
        }
        if self.max_stream_receive_window < self.initial_stream_receive_window
            || self.max_connection_receive_window < self.initial_connection_receive_window
        {
            return Err(ConfigError::Invalid(
                "QUIC maximum receive windows must be >= initial windows".to_string(),
            ));
        }
        if self.max_incoming_streams < 1 {
            return Err(ConfigError::Invalid(
                "QUIC max_incoming_streams must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Raw link-layer endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Capture/injection interface name
    pub interface: String,
    /// Local address packets are sourced from; port 0 picks an ephemeral one
    pub local_addr: SocketAddr,
    /// Next-hop router MAC address for injected frames
    pub router_mac: String,
    /// Ordered TCP fingerprint profiles announced to the server
    #[serde(default)]
    pub fingerprints: Vec<TcpFingerprint>,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.is_empty() {
            return Err(ConfigError::Invalid(
                "network interface is required".to_string(),
            ));
        }
        if self.interface.len() > 15 {
            return Err(ConfigError::Invalid(format!(
                "network interface name too long (max 15 characters): '{}'",
                self.interface
            )));
        }
        if !valid_mac(&self.router_mac) {
            return Err(ConfigError::Invalid(format!(
                "invalid MAC address '{}'",
                self.router_mac
            )));
        }
        if self.fingerprints.len() > MAX_PROFILES {
            return Err(ConfigError::Invalid(format!(
                "too many fingerprint profiles: {} (max {MAX_PROFILES})",
                self.fingerprints.len()
            )));
        }
        Ok(())
    }
}

fn valid_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                addr: "192.0.2.10:4000".parse().unwrap(),
            },
            transport: TransportConfig::default(),
            network: NetworkConfig {
                interface: "eth0".to_string(),
                local_addr: "10.0.0.5:0".parse().unwrap(),
                router_mac: "aa:bb:cc:dd:ee:ff".to_string(),
                fingerprints: Vec::new(),
            },
        }
    }

    #[test]
    fn test_defaults_validate() {
        base_config().validate().unwrap();
    }

    #[test]
    fn test_conn_count_bounds() {
        let mut config = base_config();
        config.transport.conns = 0;
        assert!(config.validate().is_err());
        config.transport.conns = 256;
        config.validate().unwrap();
        config.transport.conns = 257;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quic_keepalive_cross_check() {
        let mut config = base_config();
        config.transport.protocol = Protocol::Quic;
        config.validate().unwrap();
        config.transport.quic.keep_alive_period = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_count_capped_at_wire_limit() {
        let mut config = base_config();
        config.network.fingerprints = vec![TcpFingerprint::default(); MAX_PROFILES];
        config.validate().unwrap();
        config.network.fingerprints.push(TcpFingerprint::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_mac_rejected() {
        let mut config = base_config();
        config.network.router_mac = "not-a-mac".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let raw = r#"
            [server]
            addr = "192.0.2.10:4000"

            [transport]
            protocol = "arq"
            conns = 4

            [network]
            interface = "eth0"
            local_addr = "10.0.0.5:0"
            router_mac = "aa:bb:cc:dd:ee:ff"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.transport.conns, 4);
        assert_eq!(config.transport.protocol, Protocol::Arq);
        assert_eq!(config.transport.stream_retry_limit, 5);
        config.validate().unwrap();
    }
}
