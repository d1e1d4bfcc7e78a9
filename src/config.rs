//! Server configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default handshake budget applied when `max_handshake_bytes` is zero.
pub const DEFAULT_MAX_HANDSHAKE_BYTES: usize = 1 << 20;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub address: String,

    /// Listen port.
    pub port: u16,

    /// Maximum size of the opening handshake request in bytes.
    /// Zero selects the built-in default of 1 MiB.
    pub max_handshake_bytes: usize,

    /// Protocol policy.
    pub protocol: ProtocolConfig,

    /// Buffer sizing.
    pub limits: LimitsConfig,

    /// Optional per-operation deadlines.
    pub timeouts: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            max_handshake_bytes: DEFAULT_MAX_HANDSHAKE_BYTES,
            protocol: ProtocolConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address to bind.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        format!("{}:{}", self.address, self.port).parse().ok()
    }

    /// Handshake budget with the zero-means-default rule applied.
    pub fn effective_max_handshake_bytes(&self) -> usize {
        if self.max_handshake_bytes == 0 {
            DEFAULT_MAX_HANDSHAKE_BYTES
        } else {
            self.max_handshake_bytes
        }
    }
}

/// Protocol policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Reject unmasked data frames from the peer, as RFC 6455 requires of
    /// a server.
    pub require_masked_frames: bool,

    /// Answer pings arriving inside a message read with a pong.
    pub auto_pong: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            require_masked_frames: true,
            auto_pong: true,
        }
    }
}

/// Buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Read buffer size per connection.
    pub read_buffer_size: usize,

    /// Write buffer size per connection.
    pub write_buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
            write_buffer_size: 8 * 1024,
        }
    }
}

/// Optional read/write deadlines applied around every socket operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a single read operation.
    #[serde(with = "humantime_serde")]
    pub read: Option<Duration>,

    /// Deadline for a single write operation.
    #[serde(with = "humantime_serde")]
    pub write: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_handshake_bytes, 1 << 20);
        assert!(config.protocol.require_masked_frames);
        assert!(config.protocol.auto_pong);
        assert!(config.timeouts.read.is_none());
        assert!(config.timeouts.write.is_none());
    }

    #[test]
    fn test_zero_handshake_budget_selects_default() {
        let config = ServerConfig {
            max_handshake_bytes: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.effective_max_handshake_bytes(), 1 << 20);

        let config = ServerConfig {
            max_handshake_bytes: 4096,
            ..ServerConfig::default()
        };
        assert_eq!(config.effective_max_handshake_bytes(), 4096);
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            address: "127.0.0.1".to_string(),
            port: 9876,
            ..ServerConfig::default()
        };
        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.port(), 9876);
    }

    #[test]
    fn test_deserialize_toml() {
        let toml = r#"
            address = "127.0.0.1"
            port = 9000
            max_handshake_bytes = 8192

            [protocol]
            require_masked_frames = false

            [timeouts]
            read = "30s"
        "#;

        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_handshake_bytes, 8192);
        assert!(!config.protocol.require_masked_frames);
        assert!(config.protocol.auto_pong);
        assert_eq!(config.timeouts.read, Some(Duration::from_secs(30)));
        assert!(config.timeouts.write.is_none());
    }
}
