//! A P2P connection to one node
//!
//! Each connection runs two tasks. The receive task owns the read half of the
//! socket, decodes frames in arrival order, answers handshake and ping
//! traffic, records every message in the [`MessageLog`] and then hands it to
//! the [`MessageHandler`]. The write task owns the write half and drains a
//! queue fed by [`Connection::send`] and [`PeerHandle::send_nowait`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use nodenet_core::wait_until;
use nodenet_wire::{DecodeStatus, Hash256, Inventory, Message, WireCodec};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{CloseReason, ConnectError, P2pError, SendError};
use crate::handler::{MessageHandler, receive};
use crate::log::{LogView, MessageLog};
use crate::peer::{ConnectionId, Direction, Outbound, PeerHandle};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection; only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Handle to a running connection
///
/// Cloning is cheap; all clones drive the same socket. Call
/// [`close`](Connection::close) when done, the tasks otherwise run until the
/// remote side hangs up.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    peer: PeerHandle,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    close_reason: Mutex<Option<CloseReason>>,
    tasks: Mutex<Option<Tasks>>,
}

struct Tasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Inner {
    /// Record the first close reason and stop both tasks
    fn begin_close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.peer.cancel.cancel();
        self.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Open => {
                *state = ConnectionState::Closing;
                true
            }
            _ => false,
        });
    }

    fn mark_closed(&self) {
        self.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Closed;
            *state = ConnectionState::Closed;
            changed
        });
    }

    fn reason(&self) -> CloseReason {
        self.close_reason
            .lock()
            .clone()
            .unwrap_or(CloseReason::LocalClose)
    }
}

/// Marks the connection closed when the receive task ends, including by panic
struct ClosedOnDrop(Arc<Inner>);

impl Drop for ClosedOnDrop {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.begin_close(CloseReason::TaskPanicked);
        }
        self.0.mark_closed();
    }
}

impl Connection {
    /// Connect to `addr` and start the connection tasks
    ///
    /// With `auto_handshake` enabled our `version` is queued before the
    /// receive task starts, so it is always the first frame on the wire.
    #[instrument(skip(config, handler))]
    pub async fn open(
        addr: SocketAddr,
        config: ConnectionConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ConnectError> {
        let timeout = config.connect_timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectError::Timeout { addr, timeout })?
            .map_err(|source| ConnectError::Io { addr, source })?;

        Self::start(stream, Direction::Outbound, config, handler)
            .map_err(|source| ConnectError::Io { addr, source })
    }

    /// Wrap a stream accepted by a listener
    ///
    /// Inbound connections wait for the peer's `version` before sending ours.
    pub fn accept(
        stream: TcpStream,
        config: ConnectionConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> std::io::Result<Self> {
        Self::start(stream, Direction::Inbound, config, handler)
    }

    fn start(
        stream: TcpStream,
        direction: Direction,
        config: ConnectionConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> std::io::Result<Self> {
        let remote = stream.peer_addr()?;
        let local = stream.local_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let peer = PeerHandle {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            local,
            direction,
            outbound,
            cancel: CancellationToken::new(),
            log: MessageLog::new(),
        };

        let announce = direction == Direction::Outbound && config.auto_handshake;
        if announce {
            peer.send_nowait(Message::Version(config.version_message(remote, local)))
                .map_err(std::io::Error::other)?;
        }

        let (state, _) = watch::channel(ConnectionState::Connecting);
        let inner = Arc::new(Inner {
            peer,
            config,
            state,
            close_reason: Mutex::new(None),
            tasks: Mutex::new(None),
        });
        inner.state.send_replace(ConnectionState::Open);

        let writer = tokio::spawn(write_loop(write_half, outbound_rx, inner.clone()));
        let reader = tokio::spawn(read_loop(read_half, handler, inner.clone(), announce));
        *inner.tasks.lock() = Some(Tasks { reader, writer });

        info!(
            conn = inner.peer.id,
            %remote,
            %direction,
            "Connection open"
        );

        Ok(Self { inner })
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.peer.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.peer.remote
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.peer.local
    }

    pub fn direction(&self) -> Direction {
        self.inner.peer.direction
    }

    /// The handle callbacks receive for this connection
    pub fn peer(&self) -> &PeerHandle {
        &self.inner.peer
    }

    /// Receipt counters and last-message slots
    pub fn log(&self) -> &MessageLog {
        &self.inner.peer.log
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Why the connection closed, once it has
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.lock().clone()
    }

    /// The failure that closed the connection, if it did not close cleanly
    pub fn terminal_error(&self) -> Option<CloseReason> {
        self.close_reason().filter(CloseReason::is_error)
    }

    /// Queue `message` and wait until it has been written to the socket
    pub async fn send(&self, message: Message) -> Result<(), SendError> {
        let conn = self.id();
        if !self.is_open() {
            return Err(SendError::NotConnected { conn });
        }

        let ack = self.inner.peer.enqueue(message)?;
        let timeout = self.inner.config.send_timeout();
        match tokio::time::timeout(timeout, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SendError::Closed { conn }),
            Err(_) => Err(SendError::Timeout { conn, timeout }),
        }
    }

    /// Close the socket and wait for both tasks to finish
    ///
    /// Idempotent. Messages still queued are failed with [`SendError::Closed`].
    pub async fn close(&self) {
        self.inner.begin_close(CloseReason::LocalClose);

        let tasks = self.inner.tasks.lock().take();
        match tasks {
            Some(Tasks { reader, writer }) => {
                let _ = writer.await;
                if let Err(e) = reader.await {
                    warn!(conn = self.id(), error = %e, "Receive task failed");
                }
            }
            None => {
                let mut state = self.inner.state.subscribe();
                let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
            }
        }

        self.inner.mark_closed();
        debug!(conn = self.id(), reason = %self.inner.reason(), "Connection closed");
    }

    /// Wait until the connection reaches `Closed`, returning why
    pub async fn wait_until_closed(&self, timeout: Duration) -> Result<CloseReason, P2pError> {
        let mut state = self.inner.state.subscribe();
        let closed = tokio::time::timeout(
            timeout,
            state.wait_for(|s| *s == ConnectionState::Closed),
        )
        .await
        .is_ok();

        if closed {
            Ok(self.inner.reason())
        } else {
            Err(P2pError::Timeout {
                conn: self.id(),
                condition: "close",
                timeout,
            })
        }
    }

    /// Poll `predicate` against the log until it holds
    ///
    /// Fails early with [`P2pError::Closed`] if the connection closes first.
    pub async fn wait_until<F>(
        &self,
        condition: &'static str,
        mut predicate: F,
        timeout: Duration,
    ) -> Result<(), P2pError>
    where
        F: FnMut(&LogView) -> bool,
    {
        let log = self.inner.peer.log.clone();
        let cancel = self.inner.peer.cancel.clone();
        let mut met = false;

        let outcome = wait_until(
            || {
                met = log.with(&mut predicate);
                met || cancel.is_cancelled()
            },
            timeout,
            self.inner.config.poll_interval(),
        )
        .await;

        let conn = self.id();
        if met {
            Ok(())
        } else if outcome.is_err() {
            Err(P2pError::Timeout {
                conn,
                condition,
                timeout,
            })
        } else {
            Err(P2pError::Closed {
                conn,
                condition,
                reason: self.inner.reason(),
            })
        }
    }

    /// Wait for the peer's `verack`
    pub async fn wait_for_verack(&self, timeout: Duration) -> Result<(), P2pError> {
        self.wait_until("verack", |log| log.count("verack") > 0, timeout)
            .await
    }

    /// Wait until the most recent `block` has hash `hash`
    pub async fn wait_for_block(&self, hash: Hash256, timeout: Duration) -> Result<(), P2pError> {
        self.wait_until(
            "block",
            move |log| matches!(log.last("block"), Some(Message::Block(b)) if b.block_hash() == hash),
            timeout,
        )
        .await
    }

    /// Wait until the most recent `getdata` requests every hash in `hashes`
    pub async fn wait_for_getdata(
        &self,
        hashes: &[Hash256],
        timeout: Duration,
    ) -> Result<(), P2pError> {
        self.wait_until(
            "getdata",
            |log| match log.last("getdata") {
                Some(Message::GetData(inv)) => hashes
                    .iter()
                    .all(|hash| inv.iter().any(|entry| entry.hash == *hash)),
                _ => false,
            },
            timeout,
        )
        .await
    }

    /// Wait until the most recent `inv` equals `expected`
    pub async fn wait_for_inv(
        &self,
        expected: &[Inventory],
        timeout: Duration,
    ) -> Result<(), P2pError> {
        self.wait_until(
            "inv",
            |log| matches!(log.last("inv"), Some(Message::Inv(inv)) if inv.as_slice() == expected),
            timeout,
        )
        .await
    }

    /// Round-trip a ping so every message the peer sent before it is processed
    pub async fn sync_with_ping(&self, timeout: Duration) -> Result<(), P2pError> {
        let nonce: u64 = rand::random();
        self.send(Message::Ping(nonce)).await?;
        self.wait_until(
            "pong",
            move |log| matches!(log.last("pong"), Some(Message::Pong(n)) if *n == nonce),
            timeout,
        )
        .await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("remote", &self.remote_addr())
            .field("state", &self.state())
            .finish()
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    handler: Arc<dyn MessageHandler>,
    inner: Arc<Inner>,
    mut version_sent: bool,
) {
    let _closed = ClosedOnDrop(inner.clone());
    let peer = inner.peer.clone();
    let codec = WireCodec::new(inner.config.magic);
    let mut buf = BytesMut::with_capacity(inner.config.read_buffer_size);

    handler.on_open(&peer);

    let reason = 'read: loop {
        loop {
            match codec.decode(&buf) {
                Ok(DecodeStatus::Complete { message, consumed }) => {
                    buf.advance(consumed);
                    trace!(conn = peer.id, command = message.command(), "Received");
                    receive(handler.as_ref(), &peer, &message, |message| {
                        if inner.config.auto_handshake {
                            respond(&inner, &mut version_sent, message);
                        }
                    });
                }
                Ok(DecodeStatus::NeedMoreData) => break,
                Err(e) => {
                    warn!(conn = peer.id, error = %e, "Undecodable frame, closing connection");
                    break 'read CloseReason::Decode(e);
                }
            }
        }

        tokio::select! {
            _ = peer.cancel.cancelled() => break CloseReason::LocalClose,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break CloseReason::RemoteClosed,
                Ok(_) => {}
                Err(e) => break CloseReason::Io(e.to_string()),
            },
        }
    };

    inner.begin_close(reason);
    let reason = inner.reason();
    debug!(conn = peer.id, %reason, "Receive task exiting");
    handler.on_close(&peer, &reason);
}

/// Built-in protocol replies, queued before the user callback runs
fn respond(inner: &Inner, version_sent: &mut bool, message: &Message) {
    let peer = &inner.peer;
    let result = match message {
        Message::Version(_) => {
            let ours = if *version_sent {
                Ok(())
            } else {
                *version_sent = true;
                peer.send_nowait(Message::Version(
                    inner.config.version_message(peer.remote, peer.local),
                ))
            };
            ours.and_then(|()| peer.send_nowait(Message::Verack))
        }
        Message::Ping(nonce) => peer.send_nowait(Message::Pong(*nonce)),
        _ => Ok(()),
    };

    if let Err(e) = result {
        debug!(conn = peer.id, error = %e, "Protocol reply dropped");
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inner: Arc<Inner>,
) {
    let conn = inner.peer.id;
    let cancel = inner.peer.cancel.clone();
    let codec = WireCodec::new(inner.config.magic);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = outbound.recv() => next,
        };
        let Some(Outbound { message, ack }) = next else {
            break;
        };

        let frame = match codec.encode(&message) {
            Ok(frame) => frame,
            Err(source) => {
                warn!(
                    conn,
                    command = message.command(),
                    error = %source,
                    "Dropping unframeable message"
                );
                if let Some(ack) = ack {
                    let _ = ack.send(Err(SendError::Encode { conn, source }));
                }
                continue;
            }
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SendError::Closed { conn }),
            written = writer.write_all(&frame) => written.map_err(|e| SendError::Io {
                conn,
                detail: e.to_string(),
            }),
        };

        let failed = match &result {
            Ok(()) => {
                trace!(conn, command = message.command(), bytes = frame.len(), "Sent");
                false
            }
            Err(SendError::Io { detail, .. }) => {
                warn!(conn, error = %detail, "Write failed, closing connection");
                inner.begin_close(CloseReason::Io(detail.clone()));
                true
            }
            Err(_) => true,
        };

        if let Some(ack) = ack {
            let _ = ack.send(result);
        }
        if failed {
            break;
        }
    }

    outbound.close();
    while let Ok(Outbound { ack, .. }) = outbound.try_recv() {
        if let Some(ack) = ack {
            let _ = ack.send(Err(SendError::Closed { conn }));
        }
    }
    let _ = writer.shutdown().await;
}
