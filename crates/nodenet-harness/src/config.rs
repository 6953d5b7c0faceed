//! Harness configuration
//!
//! [`HarnessConfig`] is built in code with `with_*` methods or loaded from
//! TOML for the CLI:
//!
//! ```toml
//! binary = "/usr/local/bin/bitcoind"
//! num_nodes = 3
//! common_args = ["-regtest"]
//! extra_args = [[], ["-debug=net"]]
//!
//! [topology]
//! preset = "chain"
//!
//! [timeouts]
//! startup_timeout_ms = 30000
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use nodenet_core::{NodeIndex, TimeoutConfig};
use nodenet_node::{DEFAULT_READINESS_METHOD, NodeAuth};
use nodenet_wire::{Magic, Network};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::{TopologyError, TopologySpec};

/// Default bound on nodes starting or stopping at once
pub const DEFAULT_MAX_PARALLEL_STARTS: usize = 4;

/// Errors loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// How node ports are chosen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PortAllocation {
    /// Ask the OS for free ports
    #[default]
    Ephemeral,
    /// node i gets `p2p_base + i` and `rpc_base + i`
    Base { p2p_base: u16, rpc_base: u16 },
}

/// RPC credentials for every node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    UserPass {
        user: String,
        password: String,
    },
    Cookie,
}

impl From<&AuthConfig> for NodeAuth {
    fn from(auth: &AuthConfig) -> Self {
        match auth {
            AuthConfig::None => NodeAuth::None,
            AuthConfig::UserPass { user, password } => NodeAuth::UserPass {
                user: user.clone(),
                password: password.clone(),
            },
            AuthConfig::Cookie => NodeAuth::Cookie,
        }
    }
}

/// P2P network the nodes run on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkName {
    Mainnet,
    Testnet,
    #[default]
    Regtest,
    Signet,
}

impl NetworkName {
    pub fn magic(self) -> Magic {
        let network = match self {
            NetworkName::Mainnet => Network::Mainnet,
            NetworkName::Testnet => Network::Testnet,
            NetworkName::Regtest => Network::Regtest,
            NetworkName::Signet => Network::Signet,
        };
        network.magic()
    }
}

/// Complete harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Node executable
    pub binary: PathBuf,
    pub num_nodes: usize,
    /// Arguments passed to every node
    pub common_args: Vec<String>,
    /// Per-node arguments, indexed by node; missing entries mean none
    pub extra_args: Vec<Vec<String>>,
    pub topology: TopologySpec,
    pub timeouts: TimeoutConfig,
    /// Bound on nodes starting or stopping at once
    pub max_parallel_starts: usize,
    pub ports: PortAllocation,
    pub host: IpAddr,
    pub network: NetworkName,
    pub auth: AuthConfig,
    /// RPC method polled for readiness
    pub readiness_method: String,
    /// Parent directory for node data; a temporary directory when unset
    pub data_root: Option<PathBuf>,
    /// Leave data directories in place after teardown
    pub keep_data_dirs: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::new(),
            num_nodes: 1,
            common_args: Vec::new(),
            extra_args: Vec::new(),
            topology: TopologySpec::default(),
            timeouts: TimeoutConfig::default(),
            max_parallel_starts: DEFAULT_MAX_PARALLEL_STARTS,
            ports: PortAllocation::default(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            network: NetworkName::default(),
            auth: AuthConfig::default(),
            readiness_method: DEFAULT_READINESS_METHOD.to_string(),
            data_root: None,
            keep_data_dirs: false,
        }
    }
}

impl HarnessConfig {
    pub fn new(binary: impl Into<PathBuf>, num_nodes: usize) -> Self {
        Self {
            binary: binary.into(),
            num_nodes,
            ..Self::default()
        }
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_topology(mut self, topology: TopologySpec) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_common_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.common_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append arguments for one node
    pub fn with_node_args<I, S>(mut self, node: NodeIndex, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.extra_args.len() <= node {
            self.extra_args.resize_with(node + 1, Vec::new);
        }
        self.extra_args[node].extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_max_parallel_starts(mut self, max: usize) -> Self {
        self.max_parallel_starts = max;
        self
    }

    pub fn with_base_ports(mut self, p2p_base: u16, rpc_base: u16) -> Self {
        self.ports = PortAllocation::Base { p2p_base, rpc_base };
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_readiness_method(mut self, method: impl Into<String>) -> Self {
        self.readiness_method = method.into();
        self
    }

    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    pub fn with_keep_data_dirs(mut self, keep: bool) -> Self {
        self.keep_data_dirs = keep;
        self
    }

    /// Full argument list for `node`: common args, then its own
    pub fn node_args(&self, node: NodeIndex) -> Vec<String> {
        let mut args = self.common_args.clone();
        if let Some(extra) = self.extra_args.get(node) {
            args.extend(extra.iter().cloned());
        }
        args
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes == 0 {
            return Err(ConfigError::Invalid("num_nodes must be at least 1".into()));
        }
        if self.binary.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("binary is not set".into()));
        }
        if self.max_parallel_starts == 0 {
            return Err(ConfigError::Invalid(
                "max_parallel_starts must be at least 1".into(),
            ));
        }
        if self.extra_args.len() > self.num_nodes {
            return Err(ConfigError::Invalid(format!(
                "extra_args has {} entries for {} nodes",
                self.extra_args.len(),
                self.num_nodes
            )));
        }
        if let PortAllocation::Base { p2p_base, rpc_base } = self.ports {
            let span = self.num_nodes as u32;
            let p2p = u32::from(p2p_base)..u32::from(p2p_base) + span;
            let rpc = u32::from(rpc_base)..u32::from(rpc_base) + span;
            if p2p.end > u32::from(u16::MAX) + 1 || rpc.end > u32::from(u16::MAX) + 1 {
                return Err(ConfigError::Invalid("port range exceeds 65535".into()));
            }
            if p2p.start < rpc.end && rpc.start < p2p.end {
                return Err(ConfigError::Invalid("P2P and RPC port ranges overlap".into()));
            }
        }
        self.topology.build(self.num_nodes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::new("node", 3);
        assert_eq!(config.max_parallel_starts, 4);
        assert_eq!(config.topology, TopologySpec::Chain);
        assert_eq!(config.ports, PortAllocation::Ephemeral);
        assert_eq!(config.readiness_method, "getblockcount");
        assert!(!config.keep_data_dirs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_node_args() {
        let config = HarnessConfig::new("node", 3)
            .with_common_args(["-regtest"])
            .with_node_args(1, ["-debug=net"]);

        assert_eq!(config.node_args(0), vec!["-regtest"]);
        assert_eq!(config.node_args(1), vec!["-regtest", "-debug=net"]);
        assert_eq!(config.node_args(2), vec!["-regtest"]);
    }

    #[test]
    fn test_validation() {
        assert!(HarnessConfig::new("node", 0).validate().is_err());
        assert!(HarnessConfig::new("", 1).validate().is_err());
        assert!(
            HarnessConfig::new("node", 2)
                .with_node_args(2, ["-x"])
                .validate()
                .is_err()
        );
        assert!(
            HarnessConfig::new("node", 4)
                .with_base_ports(20000, 20002)
                .validate()
                .is_err()
        );
        assert!(
            HarnessConfig::new("node", 2)
                .with_topology(TopologySpec::Edges {
                    edges: vec![(0, 5)]
                })
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_toml() {
        let config = HarnessConfig::from_toml_str(
            r#"
            binary = "/usr/bin/node"
            num_nodes = 3
            extra_args = [[], ["--no-rpc"]]
            keep_data_dirs = true

            [topology]
            preset = "star"
            center = 1

            [timeouts]
            startup_timeout_ms = 2000

            [ports]
            mode = "base"
            p2p_base = 18444
            rpc_base = 18544
            "#,
        )
        .unwrap();

        assert_eq!(config.num_nodes, 3);
        assert_eq!(config.topology, TopologySpec::Star { center: 1 });
        assert_eq!(config.timeouts.startup_timeout_ms, 2000);
        // Unset timeouts keep their defaults
        assert_eq!(config.timeouts.shutdown_timeout_ms, 30_000);
        assert_eq!(config.node_args(1), vec!["--no-rpc"]);
        assert!(config.keep_data_dirs);
        assert_eq!(
            config.ports,
            PortAllocation::Base {
                p2p_base: 18444,
                rpc_base: 18544
            }
        );
    }

    #[test]
    fn test_from_toml_rejects_bad_topology() {
        let err = HarnessConfig::from_toml_str(
            r#"
            binary = "node"
            num_nodes = 2
            [topology]
            preset = "edges"
            edges = [[1, 1]]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Topology(TopologyError::SelfLoop(1))));
    }

    #[test]
    fn test_network_magic() {
        assert_eq!(NetworkName::default().magic(), Network::Regtest.magic());
    }
}
