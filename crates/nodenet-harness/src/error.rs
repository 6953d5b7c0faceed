//! Error types for the test harness

use std::collections::BTreeMap;
use std::time::Duration;

use nodenet_core::{NodeIndex, WaitTimeout};
use nodenet_node::NodeError;
use nodenet_p2p::{P2pError, SendError};
use nodenet_rpc::RpcError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::harness::HarnessState;
use crate::report::{Failure, FailureKind, HarnessReport};
use crate::topology::TopologyError;

/// Errors from harness operations
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("cannot {operation} while harness is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: HarnessState,
    },

    #[error("node{index} does not exist (network has {count} nodes)")]
    NodeOutOfRange { index: NodeIndex, count: usize },

    #[error("node{a} and node{b} are not connected")]
    NotConnected { a: NodeIndex, b: NodeIndex },

    #[error("node{from} -> node{to}: {operation} not confirmed within {timeout:?}")]
    PeerTimeout {
        operation: &'static str,
        from: NodeIndex,
        to: NodeIndex,
        timeout: Duration,
    },

    #[error(
        "sync timeout after {timeout:?} on {probe}: divergent nodes {divergent:?} (observed {observed:?})"
    )]
    SyncTimeout {
        probe: String,
        group: Vec<NodeIndex>,
        divergent: Vec<NodeIndex>,
        observed: BTreeMap<NodeIndex, String>,
        timeout: Duration,
    },

    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),

    #[error("p2p: {0}")]
    P2p(#[from] P2pError),

    #[error("{operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("wait: {0}")]
    Wait(#[from] WaitTimeout),

    /// A failure raised by test logic
    #[error("{0}")]
    Test(String),

    /// Aggregate of every failure recorded before teardown finished
    #[error("{0}")]
    Failed(HarnessReport),
}

impl From<SendError> for HarnessError {
    fn from(error: SendError) -> Self {
        HarnessError::P2p(P2pError::Send(error))
    }
}

impl HarnessError {
    /// Shorthand for failing a test with a message
    pub fn test(message: impl Into<String>) -> Self {
        HarnessError::Test(message.into())
    }

    /// Report entries describing this error, one per responsible node
    pub fn failures(&self, operation: &str) -> Vec<Failure> {
        match self {
            HarnessError::Node(error) => vec![Failure::from_node_error(operation, error)],
            HarnessError::SyncTimeout { divergent, .. } => divergent
                .iter()
                .map(|&node| {
                    Failure::new(Some(node), FailureKind::SyncTimeout, operation, self.to_string())
                })
                .collect(),
            HarnessError::PeerTimeout { from, .. } => vec![Failure::new(
                Some(*from),
                FailureKind::Connect,
                operation,
                self.to_string(),
            )],
            HarnessError::Rpc(_) => {
                vec![Failure::new(None, FailureKind::Rpc, operation, self.to_string())]
            }
            HarnessError::Failed(report) => report.failures().to_vec(),
            _ => vec![Failure::new(None, FailureKind::Test, operation, self.to_string())],
        }
    }
}

/// Result type alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
