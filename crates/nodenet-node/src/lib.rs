//! # Nodenet Node
//!
//! [`NodeSupervisor`] owns one node process: it spawns the binary with its
//! data directory and ports, polls RPC until the node answers, hands out the
//! node's [`RpcClient`](nodenet_rpc::RpcClient) and P2P connections, and
//! stops the process gracefully or by force.
//!
//! ```rust,ignore
//! use nodenet_node::{NodeConfig, NodeSupervisor};
//!
//! let config = NodeConfig::new(0, "bitcoind", datadir).with_ports(18444, 18443);
//! let mut node = NodeSupervisor::launch(config).await?;
//! let height = node.rpc().get_block_count().await?;
//! node.stop(true).await?;
//! ```

pub mod config;
pub mod error;
pub mod supervisor;

pub use config::{DEFAULT_READINESS_METHOD, NodeAuth, NodeConfig};
pub use error::{NodeError, NodeErrorKind, NodeResult};
pub use supervisor::{NodeState, NodeSupervisor};
