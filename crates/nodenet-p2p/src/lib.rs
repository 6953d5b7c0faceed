//! # Nodenet P2P
//!
//! Test-driver side of the P2P protocol: a [`Connection`] owns one TCP
//! socket to a node and runs a dedicated receive task that decodes frames
//! and hands each message to a [`MessageHandler`], in wire order.
//!
//! ## Features
//!
//! - One reader task and one writer task per connection
//! - Automatic `version`/`verack` handshake and `ping`/`pong` replies
//! - Per-command receipt counters and last-message slots ([`MessageLog`]),
//!   updated before any user callback runs
//! - Polling sync helpers (`wait_for_verack`, `wait_for_block`, `sync_with_ping`, ...)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nodenet_p2p::{Connection, ConnectionConfig, NoopHandler};
//! use nodenet_wire::Message;
//!
//! let conn = Connection::open(addr, ConnectionConfig::default(), Arc::new(NoopHandler)).await?;
//! conn.wait_for_verack(Duration::from_secs(5)).await?;
//! conn.send(Message::Ping(1)).await?;
//! conn.sync_with_ping(Duration::from_secs(5)).await?;
//! conn.close().await;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod log;
pub mod peer;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{CloseReason, ConnectError, P2pError, SendError};
pub use handler::{MessageHandler, NoopHandler, dispatch};
pub use log::{LogEntry, LogView, MessageLog};
pub use peer::{ConnectionId, Direction, PeerHandle};
