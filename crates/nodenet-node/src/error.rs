//! Error types for the node supervisor

use std::path::PathBuf;
use std::time::Duration;

use nodenet_core::NodeIndex;
use nodenet_p2p::ConnectError;
use nodenet_rpc::RpcError;
use thiserror::Error;

use crate::supervisor::NodeState;

/// Errors from supervising one node; every variant names the node
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node{node}: failed to spawn {}: {source}", binary.display())]
    Spawn {
        node: NodeIndex,
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("node{node}: not RPC-ready within {timeout:?} (last error: {last_error})")]
    StartupTimeout {
        node: NodeIndex,
        timeout: Duration,
        last_error: String,
    },

    #[error("node{node}: process exited during {operation} ({status})")]
    ProcessExited {
        node: NodeIndex,
        operation: &'static str,
        status: String,
    },

    #[error("node{node}: did not exit within {timeout:?} of shutdown; killed")]
    UngracefulShutdown { node: NodeIndex, timeout: Duration },

    #[error("node{node}: {operation}: {source}")]
    Rpc {
        node: NodeIndex,
        operation: &'static str,
        #[source]
        source: RpcError,
    },

    #[error("node{node}: P2P connection failed: {source}")]
    Connect {
        node: NodeIndex,
        #[source]
        source: ConnectError,
    },

    #[error("node{node}: cannot {operation} while {state:?}")]
    InvalidState {
        node: NodeIndex,
        operation: &'static str,
        state: NodeState,
    },

    #[error("node{node}: {operation}: {source}")]
    Io {
        node: NodeIndex,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification of a [`NodeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeErrorKind {
    Spawn,
    StartupTimeout,
    ProcessExited,
    UngracefulShutdown,
    Rpc,
    Connect,
    InvalidState,
    Io,
}

impl NodeError {
    /// Index of the node the error belongs to
    pub fn node(&self) -> NodeIndex {
        match self {
            NodeError::Spawn { node, .. }
            | NodeError::StartupTimeout { node, .. }
            | NodeError::ProcessExited { node, .. }
            | NodeError::UngracefulShutdown { node, .. }
            | NodeError::Rpc { node, .. }
            | NodeError::Connect { node, .. }
            | NodeError::InvalidState { node, .. }
            | NodeError::Io { node, .. } => *node,
        }
    }

    pub fn kind(&self) -> NodeErrorKind {
        match self {
            NodeError::Spawn { .. } => NodeErrorKind::Spawn,
            NodeError::StartupTimeout { .. } => NodeErrorKind::StartupTimeout,
            NodeError::ProcessExited { .. } => NodeErrorKind::ProcessExited,
            NodeError::UngracefulShutdown { .. } => NodeErrorKind::UngracefulShutdown,
            NodeError::Rpc { .. } => NodeErrorKind::Rpc,
            NodeError::Connect { .. } => NodeErrorKind::Connect,
            NodeError::InvalidState { .. } => NodeErrorKind::InvalidState,
            NodeError::Io { .. } => NodeErrorKind::Io,
        }
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
