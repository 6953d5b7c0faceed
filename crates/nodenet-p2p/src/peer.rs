//! Handle given to message callbacks

use std::fmt;
use std::net::SocketAddr;

use nodenet_wire::{Message, validate_command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::SendError;
use crate::log::MessageLog;

/// Process-unique connection identifier
pub type ConnectionId = u64;

/// Which side opened the TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// A message queued for the writer task
pub(crate) struct Outbound {
    pub message: Message,
    pub ack: Option<oneshot::Sender<Result<(), SendError>>>,
}

/// Cheap handle to one connection, usable from inside callbacks
///
/// Sending through a `PeerHandle` only queues the message, so callbacks can
/// reply without blocking the receive task.
#[derive(Clone)]
pub struct PeerHandle {
    pub(crate) id: ConnectionId,
    pub(crate) remote: SocketAddr,
    pub(crate) local: SocketAddr,
    pub(crate) direction: Direction,
    pub(crate) outbound: mpsc::UnboundedSender<Outbound>,
    pub(crate) cancel: CancellationToken,
    pub(crate) log: MessageLog,
}

impl PeerHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Receipt counters for this connection
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Queue `message` for the writer task without waiting for the write
    pub fn send_nowait(&self, message: Message) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed { conn: self.id });
        }
        self.check_command(&message)?;
        self.outbound
            .send(Outbound { message, ack: None })
            .map_err(|_| SendError::Closed { conn: self.id })
    }

    /// Reject messages the writer could not frame before they are queued
    fn check_command(&self, message: &Message) -> Result<(), SendError> {
        validate_command(message.command()).map_err(|source| SendError::Encode {
            conn: self.id,
            source,
        })
    }

    pub(crate) fn enqueue(
        &self,
        message: Message,
    ) -> Result<oneshot::Receiver<Result<(), SendError>>, SendError> {
        self.check_command(&message)?;
        let (tx, rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                message,
                ack: Some(tx),
            })
            .map_err(|_| SendError::Closed { conn: self.id })?;
        Ok(rx)
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("direction", &self.direction)
            .finish()
    }
}
