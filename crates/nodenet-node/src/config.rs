//! Per-node configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use nodenet_core::{NodeIndex, TimeoutConfig};
use nodenet_p2p::ConnectionConfig;
use nodenet_rpc::RpcAuth;

/// RPC method polled until the node answers
pub const DEFAULT_READINESS_METHOD: &str = "getblockcount";

/// How the supervisor authenticates RPC calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeAuth {
    #[default]
    None,
    UserPass {
        user: String,
        password: String,
    },
    /// Cookie file the node writes into its data directory
    Cookie,
}

/// Configuration for one node process
///
/// Fixed once the supervisor owning it starts.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Position of the node in its network
    pub index: NodeIndex,
    /// Executable to spawn
    pub binary: PathBuf,
    /// Data directory passed as `--datadir`
    pub data_dir: PathBuf,
    /// Host the node listens on
    pub host: IpAddr,
    /// P2P listening port
    pub p2p_port: u16,
    /// RPC listening port
    pub rpc_port: u16,
    /// Extra command-line arguments appended after the standard ones
    pub extra_args: Vec<String>,
    /// RPC method used for readiness polling
    pub readiness_method: String,
    /// RPC credentials
    pub auth: NodeAuth,
    /// Startup, shutdown and RPC bounds
    pub timeouts: TimeoutConfig,
    /// Settings for P2P connections opened to this node
    pub connection: ConnectionConfig,
}

impl NodeConfig {
    pub fn new(index: NodeIndex, binary: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            index,
            binary: binary.into(),
            data_dir: data_dir.into(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            p2p_port: 0,
            rpc_port: 0,
            extra_args: Vec::new(),
            readiness_method: DEFAULT_READINESS_METHOD.to_string(),
            auth: NodeAuth::None,
            timeouts: TimeoutConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }

    pub fn with_ports(mut self, p2p_port: u16, rpc_port: u16) -> Self {
        self.p2p_port = p2p_port;
        self.rpc_port = rpc_port;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_readiness_method(mut self, method: impl Into<String>) -> Self {
        self.readiness_method = method.into();
        self
    }

    pub fn with_auth(mut self, auth: NodeAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Full command line after the binary name
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--datadir={}", self.data_dir.display()),
            format!("--port={}", self.p2p_port),
            format!("--rpcport={}", self.rpc_port),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn p2p_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.p2p_port)
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.rpc_port)
    }

    pub fn rpc_auth(&self) -> RpcAuth {
        match &self.auth {
            NodeAuth::None => RpcAuth::None,
            NodeAuth::UserPass { user, password } => RpcAuth::user_pass(user, password),
            NodeAuth::Cookie => RpcAuth::cookie(self.data_dir.join(".cookie")),
        }
    }
}
