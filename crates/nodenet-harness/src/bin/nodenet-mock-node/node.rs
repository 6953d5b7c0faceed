//! Shared state of the mock node

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nodenet_p2p::{
    ConnectError, Connection, ConnectionConfig, ConnectionId, Direction, PeerHandle,
};
use nodenet_rpc::PeerInfo;
use nodenet_wire::{Block, Hash256, Inventory, Message, VersionMessage};
use parking_lot::{Mutex, MutexGuard};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{Accepted, Chain};
use crate::p2p::PeerHandler;

/// Behaviour switches from the command line
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    /// Keep running after the `stop` RPC
    pub ignore_stop: bool,
    /// Answer RPC with the warm-up error for this long after start
    pub warmup: Duration,
}

/// A connected peer as seen by `getpeerinfo`
pub struct Peer {
    pub handle: PeerHandle,
    pub version: Option<VersionMessage>,
}

impl Peer {
    fn handshaked(&self) -> bool {
        self.version.is_some() && self.handle.log().count("verack") > 0
    }
}

pub struct MockNode {
    chain: Mutex<Chain>,
    peers: DashMap<ConnectionId, Peer>,
    connections: DashMap<ConnectionId, Connection>,
    connection_config: ConnectionConfig,
    shutdown: CancellationToken,
    options: NodeOptions,
    ready_at: Instant,
}

impl MockNode {
    pub fn new(connection_config: ConnectionConfig, options: NodeOptions) -> Arc<Self> {
        Arc::new(Self {
            chain: Mutex::new(Chain::new()),
            peers: DashMap::new(),
            connections: DashMap::new(),
            connection_config,
            shutdown: CancellationToken::new(),
            ready_at: Instant::now() + options.warmup,
            options,
        })
    }

    pub fn chain(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock()
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection_config
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_warming_up(&self) -> bool {
        Instant::now() < self.ready_at
    }

    /// Begin shutdown unless configured to ignore it; returns whether it will stop
    pub fn request_stop(&self) -> bool {
        if self.options.ignore_stop {
            warn!("Ignoring stop request");
            return false;
        }
        info!("Stop requested");
        self.shutdown.cancel();
        true
    }

    /// Connect a block and announce whatever it connected to the other peers
    pub fn submit_block(&self, block: Block, source: Option<ConnectionId>) -> Accepted {
        let accepted = self.chain.lock().accept(block);
        if let Accepted::Connected(hashes) = &accepted {
            debug!(count = hashes.len(), height = self.chain.lock().height(), "Blocks connected");
            self.announce(hashes, source);
        }
        accepted
    }

    /// Mine `count` blocks and announce them
    pub fn generate(&self, count: usize) -> Vec<Hash256> {
        let hashes: Vec<Hash256> = self
            .chain
            .lock()
            .mine(count)
            .iter()
            .map(Block::block_hash)
            .collect();
        self.announce(&hashes, None);
        hashes
    }

    fn announce(&self, hashes: &[Hash256], except: Option<ConnectionId>) {
        if hashes.is_empty() {
            return;
        }
        let inv: Vec<Inventory> = hashes.iter().copied().map(Inventory::block).collect();
        for peer in self.peers.iter() {
            if Some(*peer.key()) == except || !peer.handshaked() {
                continue;
            }
            if let Err(e) = peer.handle.send_nowait(Message::Inv(inv.clone())) {
                debug!(conn = peer.key(), error = %e, "Announcement dropped");
            }
        }
    }

    pub fn register_peer(&self, handle: &PeerHandle) {
        self.peers.insert(
            handle.id(),
            Peer {
                handle: handle.clone(),
                version: None,
            },
        );
    }

    pub fn record_version(&self, id: ConnectionId, version: &VersionMessage) {
        if let Some(mut peer) = self.peers.get_mut(&id) {
            peer.version = Some(version.clone());
        }
    }

    pub fn remove_peer(&self, id: ConnectionId) {
        self.peers.remove(&id);
        self.connections.remove(&id);
    }

    pub fn peer_info(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .iter()
            .map(|peer| {
                let handshaked = peer.handshaked();
                let version = peer.version.as_ref();
                PeerInfo {
                    id: *peer.key(),
                    addr: peer.handle.remote_addr().to_string(),
                    inbound: peer.handle.direction() == Direction::Inbound,
                    subver: version.map(|v| v.user_agent.clone()).unwrap_or_default(),
                    version: match version {
                        Some(v) if handshaked => u64::try_from(v.version).unwrap_or_default(),
                        _ => 0,
                    },
                    startingheight: version.map_or(0, |v| i64::from(v.start_height)),
                }
            })
            .collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    fn peer_at(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.peers
            .iter()
            .find(|peer| peer.handle.remote_addr() == addr)
            .map(|peer| *peer.key())
    }

    /// Open an outbound connection; already-connected addresses are left alone
    pub async fn add_node(self: &Arc<Self>, addr: SocketAddr) -> Result<(), ConnectError> {
        if self.peer_at(addr).is_some() {
            debug!(%addr, "Already connected");
            return Ok(());
        }
        let handler = Arc::new(PeerHandler::new(self.clone()));
        let conn = Connection::open(addr, self.connection_config.clone(), handler).await?;
        self.connections.insert(conn.id(), conn);
        Ok(())
    }

    pub fn accept_inbound(self: &Arc<Self>, stream: TcpStream) -> std::io::Result<()> {
        let handler = Arc::new(PeerHandler::new(self.clone()));
        let conn = Connection::accept(stream, self.connection_config.clone(), handler)?;
        self.connections.insert(conn.id(), conn);
        Ok(())
    }

    /// Close the connection to `addr`; false if there is none
    pub async fn disconnect_node(&self, addr: SocketAddr) -> bool {
        let Some(id) = self.peer_at(addr) else {
            return false;
        };
        let conn = self.connections.get(&id).map(|c| c.clone());
        if let Some(conn) = conn {
            conn.close().await;
        }
        self.remove_peer(id);
        true
    }

    /// Close every connection
    pub async fn close_all(&self) {
        let conns: Vec<Connection> = self.connections.iter().map(|c| c.clone()).collect();
        for conn in conns {
            conn.close().await;
        }
        self.connections.clear();
        self.peers.clear();
    }
}
