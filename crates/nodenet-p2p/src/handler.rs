//! Message callbacks
//!
//! Implement [`MessageHandler`] and override only the callbacks a test cares
//! about. Callbacks run on the connection's receive task, one at a time and
//! in wire order, so they must not block; reply through the [`PeerHandle`].

use nodenet_wire::{
    AddrEntry, Block, BlockHeader, BlockLocator, Inventory, Message, Transaction, VersionMessage,
};

use crate::error::CloseReason;
use crate::peer::PeerHandle;

/// Per-message-type callbacks for one connection
pub trait MessageHandler: Send + Sync + 'static {
    /// The connection is open and its receive task is running
    fn on_open(&self, _peer: &PeerHandle) {}

    /// The connection closed; no further callbacks follow
    fn on_close(&self, _peer: &PeerHandle, _reason: &CloseReason) {}

    fn on_version(&self, _peer: &PeerHandle, _version: &VersionMessage) {}
    fn on_verack(&self, _peer: &PeerHandle) {}
    fn on_ping(&self, _peer: &PeerHandle, _nonce: u64) {}
    fn on_pong(&self, _peer: &PeerHandle, _nonce: u64) {}
    fn on_inv(&self, _peer: &PeerHandle, _inv: &[Inventory]) {}
    fn on_getdata(&self, _peer: &PeerHandle, _inv: &[Inventory]) {}
    fn on_notfound(&self, _peer: &PeerHandle, _inv: &[Inventory]) {}
    fn on_block(&self, _peer: &PeerHandle, _block: &Block) {}
    fn on_tx(&self, _peer: &PeerHandle, _tx: &Transaction) {}
    fn on_headers(&self, _peer: &PeerHandle, _headers: &[BlockHeader]) {}
    fn on_getheaders(&self, _peer: &PeerHandle, _locator: &BlockLocator) {}
    fn on_getblocks(&self, _peer: &PeerHandle, _locator: &BlockLocator) {}
    fn on_sendheaders(&self, _peer: &PeerHandle) {}
    fn on_getaddr(&self, _peer: &PeerHandle) {}
    fn on_addr(&self, _peer: &PeerHandle, _addrs: &[AddrEntry]) {}
    fn on_mempool(&self, _peer: &PeerHandle) {}
    fn on_feefilter(&self, _peer: &PeerHandle, _feerate: i64) {}

    /// A command with no typed callback
    fn on_unknown(&self, _peer: &PeerHandle, _command: &str, _payload: &[u8]) {}
}

/// Handler that only keeps the receipt counters
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl MessageHandler for NoopHandler {}

/// Receive-task entry point: record `message`, run `reply`, then the callback
///
/// The receive task is the only caller, which keeps it the only writer of
/// the peer's log.
pub(crate) fn receive(
    handler: &dyn MessageHandler,
    peer: &PeerHandle,
    message: &Message,
    reply: impl FnOnce(&Message),
) {
    peer.log.record(message);
    reply(message);
    dispatch(handler, peer, message);
}

/// Run the callback matching `message`
///
/// Leaves the log alone, so a handler can forward messages to another
/// handler without counting them twice.
pub fn dispatch(handler: &dyn MessageHandler, peer: &PeerHandle, message: &Message) {
    match message {
        Message::Version(version) => handler.on_version(peer, version),
        Message::Verack => handler.on_verack(peer),
        Message::Ping(nonce) => handler.on_ping(peer, *nonce),
        Message::Pong(nonce) => handler.on_pong(peer, *nonce),
        Message::Inv(inv) => handler.on_inv(peer, inv),
        Message::GetData(inv) => handler.on_getdata(peer, inv),
        Message::NotFound(inv) => handler.on_notfound(peer, inv),
        Message::Block(block) => handler.on_block(peer, block),
        Message::Tx(tx) => handler.on_tx(peer, tx),
        Message::Headers(headers) => handler.on_headers(peer, headers),
        Message::GetHeaders(locator) => handler.on_getheaders(peer, locator),
        Message::GetBlocks(locator) => handler.on_getblocks(peer, locator),
        Message::SendHeaders => handler.on_sendheaders(peer),
        Message::GetAddr => handler.on_getaddr(peer),
        Message::Addr(addrs) => handler.on_addr(peer, addrs),
        Message::Mempool => handler.on_mempool(peer),
        Message::FeeFilter(rate) => handler.on_feefilter(peer, *rate),
        Message::Unknown { command, payload } => handler.on_unknown(peer, command, payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MessageLog;
    use crate::peer::Direction;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl MessageHandler for Recorder {
        fn on_ping(&self, peer: &PeerHandle, nonce: u64) {
            // The log must already include this message
            assert!(peer.log().count("ping") >= 1);
            self.seen.lock().push(format!("ping:{nonce}"));
        }

        fn on_unknown(&self, _peer: &PeerHandle, command: &str, payload: &[u8]) {
            self.seen.lock().push(format!("{command}:{}", payload.len()));
        }
    }

    fn test_peer() -> PeerHandle {
        let (outbound, _rx) = mpsc::unbounded_channel();
        PeerHandle {
            id: 1,
            remote: "127.0.0.1:1".parse().unwrap(),
            local: "127.0.0.1:2".parse().unwrap(),
            direction: Direction::Outbound,
            outbound,
            cancel: CancellationToken::new(),
            log: MessageLog::new(),
        }
    }

    #[test]
    fn test_receive_records_before_reply_and_callback() {
        let handler = Recorder::default();
        let peer = test_peer();
        let mut replies = Vec::new();

        receive(&handler, &peer, &Message::Ping(5), |message| {
            assert_eq!(peer.log().count("ping"), 1);
            assert!(handler.seen.lock().is_empty());
            replies.push(message.command().to_string());
        });
        receive(
            &handler,
            &peer,
            &Message::Unknown {
                command: "sendcmpct".into(),
                payload: vec![0u8; 9].into(),
            },
            |_| {},
        );

        assert_eq!(replies, vec!["ping"]);
        assert_eq!(*handler.seen.lock(), vec!["ping:5", "sendcmpct:9"]);
        assert_eq!(peer.log().count("sendcmpct"), 1);
    }

    #[test]
    fn test_dispatch_leaves_log_alone() {
        let handler = Recorder::default();
        let peer = test_peer();

        dispatch(&handler, &peer, &Message::Unknown {
            command: "sendcmpct".into(),
            payload: vec![0u8; 2].into(),
        });

        assert_eq!(*handler.seen.lock(), vec!["sendcmpct:2"]);
        assert_eq!(peer.log().count("sendcmpct"), 0);
        assert_eq!(peer.log().total(), 0);
    }

    #[test]
    fn test_noop_handler_still_counts() {
        let peer = test_peer();
        receive(&NoopHandler, &peer, &Message::Verack, |_| {});
        receive(&NoopHandler, &peer, &Message::Verack, |_| {});
        assert_eq!(peer.log().count("verack"), 2);
    }
}
