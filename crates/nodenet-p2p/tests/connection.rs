//! Connection lifecycle tests over loopback TCP

use std::sync::Arc;
use std::time::Duration;

use nodenet_p2p::{
    CloseReason, Connection, ConnectionConfig, ConnectionState, ConnectError, Direction,
    MessageHandler, NoopHandler, P2pError, PeerHandle, SendError,
};
use nodenet_wire::{
    Block, BlockHeader, EncodeError, Hash256, Inventory, Magic, Message, Network, WireCodec,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::assert_err;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> ConnectionConfig {
    ConnectionConfig::default().with_poll_interval(Duration::from_millis(5))
}

/// Accept one inbound `Connection` and open an outbound one to it
async fn connected_pair(
    inbound: Arc<dyn MessageHandler>,
    outbound: Arc<dyn MessageHandler>,
) -> (Connection, Connection) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        Connection::accept(stream, fast_config(), inbound).unwrap()
    });
    let client = Connection::open(addr, fast_config(), outbound).await.unwrap();
    let server = accept.await.unwrap();
    (server, client)
}

/// Open an outbound connection to a raw socket the test drives by hand
async fn raw_pair(config: ConnectionConfig, handler: Arc<dyn MessageHandler>) -> (TcpStream, Connection) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let conn = Connection::open(addr, config, handler).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    (stream, conn)
}

#[derive(Default)]
struct Events {
    seen: Mutex<Vec<String>>,
}

impl MessageHandler for Events {
    fn on_open(&self, _peer: &PeerHandle) {
        self.seen.lock().push("open".into());
    }

    fn on_close(&self, _peer: &PeerHandle, reason: &CloseReason) {
        self.seen.lock().push(format!("close:{reason}"));
    }

    fn on_inv(&self, peer: &PeerHandle, inv: &[Inventory]) {
        // Ask for everything we're told about
        peer.send_nowait(Message::GetData(inv.to_vec())).unwrap();
        self.seen.lock().push("inv".into());
    }

    fn on_unknown(&self, _peer: &PeerHandle, command: &str, _payload: &[u8]) {
        self.seen.lock().push(command.to_string());
    }
}

#[tokio::test]
async fn test_handshake_between_connections() {
    nodenet_logging::init_testing();
    let (server, client) = connected_pair(Arc::new(NoopHandler), Arc::new(NoopHandler)).await;

    client.wait_for_verack(WAIT).await.unwrap();
    server.wait_for_verack(WAIT).await.unwrap();

    assert_eq!(client.direction(), Direction::Outbound);
    assert_eq!(server.direction(), Direction::Inbound);
    assert_eq!(client.log().count("version"), 1);
    assert_eq!(server.log().count("version"), 1);
    assert!(client.is_open());

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_sync_with_ping() {
    nodenet_logging::init_testing();
    let (server, client) = connected_pair(Arc::new(NoopHandler), Arc::new(NoopHandler)).await;

    client.sync_with_ping(WAIT).await.unwrap();
    server.sync_with_ping(WAIT).await.unwrap();

    assert_eq!(server.log().count("ping"), 1);
    assert_eq!(client.log().count("pong"), 1);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_callbacks_reply_through_peer_handle() {
    nodenet_logging::init_testing();
    let events = Arc::new(Events::default());
    let (server, client) = connected_pair(events.clone(), Arc::new(NoopHandler)).await;

    let hash = Hash256::hash(b"announced");
    client
        .send(Message::Inv(vec![Inventory::block(hash)]))
        .await
        .unwrap();
    client.wait_for_getdata(&[hash], WAIT).await.unwrap();

    let unknown = Message::Unknown {
        command: "sendcmpct".into(),
        payload: vec![0u8; 9].into(),
    };
    client.send(unknown).await.unwrap();
    client.sync_with_ping(WAIT).await.unwrap();
    server
        .wait_until("sendcmpct", |log| log.count("sendcmpct") == 1, WAIT)
        .await
        .unwrap();

    client.close().await;
    server.wait_until_closed(WAIT).await.unwrap();

    let seen = events.seen.lock().clone();
    assert_eq!(seen[0], "open");
    assert_eq!(seen[1], "inv");
    assert_eq!(seen[2], "sendcmpct");
    assert!(seen[3].starts_with("close:"));
}

#[tokio::test]
async fn test_wait_for_block_and_inv() {
    nodenet_logging::init_testing();
    let (server, client) = connected_pair(Arc::new(NoopHandler), Arc::new(NoopHandler)).await;

    let block = Block::new(
        BlockHeader {
            version: 1,
            prev_blockhash: Hash256::ZERO,
            merkle_root: Hash256::hash(b"coinbase"),
            time: 1_296_688_602,
            bits: 0x207f_ffff,
            nonce: 2,
        },
        vec![1u8, 0],
    );
    let inv = vec![Inventory::block(block.block_hash())];

    server.send(Message::Inv(inv.clone())).await.unwrap();
    server.send(Message::Block(block.clone())).await.unwrap();

    client.wait_for_inv(&inv, WAIT).await.unwrap();
    client.wait_for_block(block.block_hash(), WAIT).await.unwrap();

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_remote_close_is_reported() {
    nodenet_logging::init_testing();
    let events = Arc::new(Events::default());
    // No handshake, so the raw side has nothing unread and closes with FIN
    let (stream, conn) = raw_pair(fast_config().without_handshake(), events.clone()).await;

    drop(stream);

    let reason = conn.wait_until_closed(WAIT).await.unwrap();
    assert_eq!(reason, CloseReason::RemoteClosed);
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(conn.terminal_error().is_none());

    let seen = events.seen.lock().clone();
    assert_eq!(seen.last().map(String::as_str), Some("close:closed by remote peer"));
}

#[tokio::test]
async fn test_bad_magic_is_terminal() {
    nodenet_logging::init_testing();
    let (mut stream, conn) = raw_pair(fast_config(), Arc::new(NoopHandler)).await;

    let mainnet = WireCodec::new(Network::Mainnet.magic());
    stream
        .write_all(&mainnet.encode(&Message::Verack).unwrap())
        .await
        .unwrap();

    conn.wait_until_closed(WAIT).await.unwrap();
    assert!(matches!(conn.terminal_error(), Some(CloseReason::Decode(_))));
    assert_eq!(conn.log().count("verack"), 0);
}

#[tokio::test]
async fn test_outbound_sends_version_first() {
    nodenet_logging::init_testing();
    let (mut stream, conn) = raw_pair(fast_config(), Arc::new(NoopHandler)).await;

    let codec = WireCodec::new(Magic::default());
    let mut buf = Vec::new();
    let message = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before version");
        buf.extend_from_slice(&chunk[..n]);
        if let nodenet_wire::DecodeStatus::Complete { message, .. } = codec.decode(&buf).unwrap() {
            break message;
        }
    };
    assert_eq!(message.command(), "version");

    conn.close().await;
}

#[tokio::test]
async fn test_send_after_close_fails() {
    nodenet_logging::init_testing();
    let (server, client) = connected_pair(Arc::new(NoopHandler), Arc::new(NoopHandler)).await;

    client.close().await;
    client.close().await;

    let err = client.send(Message::Ping(1)).await.unwrap_err();
    assert!(matches!(err, SendError::NotConnected { .. }));
    assert_err!(client.peer().send_nowait(Message::Ping(2)));
    assert_eq!(client.close_reason(), Some(CloseReason::LocalClose));

    server.wait_until_closed(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_unframeable_message_is_rejected_on_send() {
    nodenet_logging::init_testing();
    let events = Arc::new(Events::default());
    let (server, client) = connected_pair(events.clone(), Arc::new(NoopHandler)).await;
    client.wait_for_verack(WAIT).await.unwrap();

    let long = Message::Unknown {
        command: "averylongcommand".into(),
        payload: vec![1u8].into(),
    };
    let err = client.send(long.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        SendError::Encode {
            source: EncodeError::InvalidCommand(ref command),
            ..
        } if command == "averylongcommand"
    ));
    assert!(matches!(
        client.peer().send_nowait(long),
        Err(SendError::Encode { .. })
    ));

    // The connection stays usable
    assert!(client.is_open());
    client
        .send(Message::Unknown {
            command: "twelvebytes!".into(),
            payload: vec![1u8].into(),
        })
        .await
        .unwrap();
    server
        .wait_until("unknown command", |log| log.count("twelvebytes!") == 1, WAIT)
        .await
        .unwrap();
    assert!(events.seen.lock().contains(&"twelvebytes!".to_string()));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_wait_fails_fast_when_closed() {
    nodenet_logging::init_testing();
    let (stream, conn) = raw_pair(fast_config().without_handshake(), Arc::new(NoopHandler)).await;
    drop(stream);

    let err = conn
        .wait_for_verack(Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, P2pError::Closed { condition: "verack", .. }));
}

#[tokio::test]
async fn test_wait_times_out() {
    nodenet_logging::init_testing();
    let (_stream, conn) = raw_pair(fast_config().without_handshake(), Arc::new(NoopHandler)).await;

    let err = conn
        .wait_for_verack(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, P2pError::Timeout { .. }));

    conn.close().await;
}

#[tokio::test]
async fn test_connect_refused() {
    nodenet_logging::init_testing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = Connection::open(addr, fast_config(), Arc::new(NoopHandler))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::Io { .. }));
}
