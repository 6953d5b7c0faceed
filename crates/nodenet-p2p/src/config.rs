//! Connection configuration

use std::net::SocketAddr;
use std::time::Duration;

use nodenet_wire::{Magic, NetAddress, VersionMessage};

/// Protocol version announced in our `version` message
pub const DEFAULT_PROTOCOL_VERSION: i32 = 70016;

/// User agent announced in our `version` message
pub const DEFAULT_USER_AGENT: &str = concat!("/nodenet:", env!("CARGO_PKG_VERSION"), "/");

/// Configuration for a single P2P connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Network magic framing every message
    pub magic: Magic,
    /// Protocol version we announce
    pub protocol_version: i32,
    /// Service bits we announce
    pub services: u64,
    /// User agent we announce
    pub user_agent: String,
    /// Best height we announce
    pub start_height: i32,
    /// Whether we ask the peer to relay transactions
    pub relay: bool,
    /// Answer `version` with `verack` and `ping` with `pong` automatically
    pub auto_handshake: bool,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// How long `send` waits for the frame to reach the socket, in milliseconds
    pub send_timeout_ms: u64,
    /// Interval between predicate checks in the wait helpers, in milliseconds
    pub poll_interval_ms: u64,
    /// Initial capacity of the receive buffer
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            magic: Magic::default(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            services: 0,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            start_height: 0,
            relay: true,
            auto_handshake: true,
            connect_timeout_ms: 10_000,
            send_timeout_ms: 10_000,
            poll_interval_ms: 50,
            read_buffer_size: 64 * 1024,
        }
    }
}

impl ConnectionConfig {
    /// Set the network magic
    pub fn with_magic(mut self, magic: Magic) -> Self {
        self.magic = magic;
        self
    }

    /// Set the announced user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the announced start height
    pub fn with_start_height(mut self, height: i32) -> Self {
        self.start_height = height;
        self
    }

    /// Disable the automatic handshake and ping replies
    pub fn without_handshake(mut self) -> Self {
        self.auto_handshake = false;
        self
    }

    /// Set the TCP connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the wait-helper poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// The `version` message we send to `remote`
    pub fn version_message(&self, remote: SocketAddr, local: SocketAddr) -> VersionMessage {
        VersionMessage {
            version: self.protocol_version,
            services: self.services,
            timestamp: chrono::Utc::now().timestamp(),
            receiver: NetAddress::from(remote),
            sender: NetAddress::new(self.services, local.ip(), local.port()),
            nonce: rand::random(),
            user_agent: self.user_agent.clone(),
            start_height: self.start_height,
            relay: self.relay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodenet_wire::Network;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();

        assert_eq!(config.magic, Network::Regtest.magic());
        assert_eq!(config.protocol_version, DEFAULT_PROTOCOL_VERSION);
        assert!(config.auto_handshake);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.user_agent.starts_with("/nodenet:"));
    }

    #[test]
    fn test_connection_config_custom() {
        let config = ConnectionConfig::default()
            .with_magic(Network::Mainnet.magic())
            .with_user_agent("/test:0.1/")
            .with_start_height(12)
            .without_handshake();

        assert_eq!(config.magic, Network::Mainnet.magic());
        assert_eq!(config.user_agent, "/test:0.1/");
        assert_eq!(config.start_height, 12);
        assert!(!config.auto_handshake);
    }

    #[test]
    fn test_version_message_addresses() {
        let config = ConnectionConfig::default().with_start_height(3);
        let remote: SocketAddr = "127.0.0.1:18444".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:50000".parse().unwrap();

        let version = config.version_message(remote, local);
        assert_eq!(version.receiver.port, 18444);
        assert_eq!(version.sender.port, 50000);
        assert_eq!(version.start_height, 3);
        assert_eq!(version.user_agent, config.user_agent);
    }
}
