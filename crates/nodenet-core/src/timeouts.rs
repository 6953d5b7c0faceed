//! Timeout configuration for harness operations

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts applied to every blocking wait in the harness
///
/// All values are milliseconds so the struct maps directly onto config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a node may take to answer its readiness RPC
    pub startup_timeout_ms: u64,
    /// Grace period for a node to exit after the shutdown RPC
    pub shutdown_timeout_ms: u64,
    /// Upper bound for a single RPC round trip
    pub rpc_timeout_ms: u64,
    /// Upper bound for a sync barrier
    pub sync_timeout_ms: u64,
    /// Upper bound for establishing a P2P connection (including handshake)
    pub connect_timeout_ms: u64,
    /// Interval between predicate evaluations in polling waits
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 60_000,
            shutdown_timeout_ms: 30_000,
            rpc_timeout_ms: 30_000,
            sync_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            poll_interval_ms: 50,
        }
    }
}

impl TimeoutConfig {
    /// Short timeouts suitable for tests against a local mock node
    pub fn fast() -> Self {
        Self {
            startup_timeout_ms: 10_000,
            shutdown_timeout_ms: 5_000,
            rpc_timeout_ms: 5_000,
            sync_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            poll_interval_ms: 20,
        }
    }

    pub fn startup(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn rpc(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn sync(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Set the startup timeout
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the sync barrier timeout
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the RPC timeout
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TimeoutConfig::default();
        assert_eq!(config.startup(), Duration::from_secs(60));
        assert_eq!(config.shutdown(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_builders() {
        let config = TimeoutConfig::default()
            .with_startup_timeout(Duration::from_secs(2))
            .with_sync_timeout(Duration::from_millis(1500));
        assert_eq!(config.startup_timeout_ms, 2_000);
        assert_eq!(config.sync_timeout_ms, 1_500);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = TimeoutConfig {
            poll_interval_ms: 0,
            ..TimeoutConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
