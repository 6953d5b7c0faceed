//! P2P error types

use std::net::SocketAddr;
use std::time::Duration;

use nodenet_wire::{DecodeError, EncodeError};
use thiserror::Error;

use crate::peer::ConnectionId;

/// Failure to establish a connection
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("timed out connecting to {addr} after {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    #[error("failed to connect to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to deliver a message to the socket
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection {conn} is not open")]
    NotConnected { conn: ConnectionId },

    #[error("connection {conn} closed before the message was written")]
    Closed { conn: ConnectionId },

    #[error("write on connection {conn} failed: {detail}")]
    Io { conn: ConnectionId, detail: String },

    #[error("write on connection {conn} did not complete within {timeout:?}")]
    Timeout {
        conn: ConnectionId,
        timeout: Duration,
    },

    #[error("message for connection {conn} cannot be framed: {source}")]
    Encode {
        conn: ConnectionId,
        #[source]
        source: EncodeError,
    },
}

/// Why a connection reached `Closed`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseReason {
    #[error("closed locally")]
    LocalClose,

    #[error("closed by remote peer")]
    RemoteClosed,

    #[error("undecodable data: {0}")]
    Decode(DecodeError),

    #[error("socket error: {0}")]
    Io(String),

    #[error("receive task panicked")]
    TaskPanicked,
}

impl CloseReason {
    /// Whether this reason is a failure rather than an orderly close
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CloseReason::Decode(_) | CloseReason::Io(_) | CloseReason::TaskPanicked
        )
    }
}

/// Errors from the connection-level sync helpers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum P2pError {
    #[error(transparent)]
    Send(#[from] SendError),

    #[error("connection {conn}: {condition} not met within {timeout:?}")]
    Timeout {
        conn: ConnectionId,
        condition: &'static str,
        timeout: Duration,
    },

    #[error("connection {conn} closed while waiting for {condition}: {reason}")]
    Closed {
        conn: ConnectionId,
        condition: &'static str,
        reason: CloseReason,
    },
}
