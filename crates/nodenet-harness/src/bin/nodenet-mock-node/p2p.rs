//! P2P side of the mock node: block relay over `nodenet-p2p`

use std::sync::Arc;

use nodenet_p2p::{CloseReason, MessageHandler, PeerHandle};
use nodenet_wire::{Block, Inventory, Message, VersionMessage};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::chain::Accepted;
use crate::node::MockNode;

/// Relays blocks between the node's chain and one peer
pub struct PeerHandler {
    node: Arc<MockNode>,
}

impl PeerHandler {
    pub fn new(node: Arc<MockNode>) -> Self {
        Self { node }
    }

    fn send(&self, peer: &PeerHandle, message: Message) {
        if let Err(e) = peer.send_nowait(message) {
            debug!(conn = peer.id(), error = %e, "Reply dropped");
        }
    }
}

impl MessageHandler for PeerHandler {
    fn on_open(&self, peer: &PeerHandle) {
        self.node.register_peer(peer);
    }

    fn on_close(&self, peer: &PeerHandle, reason: &CloseReason) {
        debug!(conn = peer.id(), %reason, "Peer gone");
        self.node.remove_peer(peer.id());
    }

    fn on_version(&self, peer: &PeerHandle, version: &VersionMessage) {
        self.node.record_version(peer.id(), version);
    }

    /// Handshake done: offer our whole chain so the peer can catch up
    fn on_verack(&self, peer: &PeerHandle) {
        let hashes = self.node.chain().active_chain();
        if hashes.is_empty() {
            return;
        }
        let inv = hashes.into_iter().map(Inventory::block).collect();
        self.send(peer, Message::Inv(inv));
    }

    fn on_inv(&self, peer: &PeerHandle, inv: &[Inventory]) {
        let wanted: Vec<Inventory> = {
            let chain = self.node.chain();
            inv.iter()
                .filter(|item| item.is_block() && !chain.contains(&item.hash))
                .copied()
                .collect()
        };
        if !wanted.is_empty() {
            self.send(peer, Message::GetData(wanted));
        }
    }

    fn on_getdata(&self, peer: &PeerHandle, inv: &[Inventory]) {
        let mut missing = Vec::new();
        let mut found = Vec::new();
        {
            let chain = self.node.chain();
            for item in inv {
                match chain.block(&item.hash) {
                    Some(block) if item.is_block() => found.push(block.clone()),
                    _ => missing.push(*item),
                }
            }
        }
        for block in found {
            self.send(peer, Message::Block(block));
        }
        if !missing.is_empty() {
            self.send(peer, Message::NotFound(missing));
        }
    }

    fn on_block(&self, peer: &PeerHandle, block: &Block) {
        let hash = block.block_hash();
        match self.node.submit_block(block.clone(), Some(peer.id())) {
            Accepted::Connected(_) => debug!(conn = peer.id(), %hash, "Block accepted"),
            Accepted::Orphan => debug!(conn = peer.id(), %hash, "Orphan block"),
            Accepted::Duplicate => {}
        }
    }
}

/// Accept inbound peers until shutdown
pub async fn listen(node: Arc<MockNode>, listener: TcpListener) {
    let cancel = node.shutdown_token().clone();
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                if let Err(e) = node.accept_inbound(stream) {
                    warn!(%addr, error = %e, "Failed to set up inbound peer");
                } else {
                    info!(%addr, "Inbound peer");
                }
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }
}
