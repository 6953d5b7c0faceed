//! Interleaved message injection with a concurrent consistency checker
//!
//! A raw socket streams thousands of mixed messages while a separate task
//! keeps reading the log. Each message carries its own per-command sequence
//! number, so at every observation `count(c)` must equal the sequence number
//! inside `last(c)`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use nodenet_p2p::{Connection, ConnectionConfig, MessageHandler, PeerHandle};
use nodenet_wire::{Magic, Message, WireCodec};
use parking_lot::Mutex;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

const PER_COMMAND: u64 = 2_000;
const COMMANDS: [&str; 3] = ["ping", "feefilter", "stress"];

fn sequenced(command: &str, seq: u64) -> Message {
    match command {
        "ping" => Message::Ping(seq),
        "feefilter" => Message::FeeFilter(seq as i64),
        _ => Message::Unknown {
            command: "stress".into(),
            payload: Bytes::copy_from_slice(&seq.to_le_bytes()),
        },
    }
}

fn sequence_of(message: &Message) -> u64 {
    match message {
        Message::Ping(seq) => *seq,
        Message::FeeFilter(seq) => *seq as u64,
        Message::Unknown { payload, .. } => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&payload[..8]);
            u64::from_le_bytes(bytes)
        }
        other => panic!("unexpected message {other:?}"),
    }
}

/// Records wire order as seen by callbacks
#[derive(Default)]
struct OrderRecorder {
    order: Mutex<Vec<(String, u64)>>,
}

impl MessageHandler for OrderRecorder {
    fn on_ping(&self, _peer: &PeerHandle, nonce: u64) {
        self.order.lock().push(("ping".into(), nonce));
    }

    fn on_feefilter(&self, _peer: &PeerHandle, feerate: i64) {
        self.order.lock().push(("feefilter".into(), feerate as u64));
    }

    fn on_unknown(&self, _peer: &PeerHandle, command: &str, payload: &[u8]) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&payload[..8]);
        self.order
            .lock()
            .push((command.to_string(), u64::from_le_bytes(bytes)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counters_consistent_under_interleaved_injection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handler = Arc::new(OrderRecorder::default());
    let config = ConnectionConfig::default().with_poll_interval(Duration::from_millis(5));
    let conn = Connection::open(addr, config, handler.clone()).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let (mut drain, mut writer) = stream.into_split();

    // Swallow our version and pongs so the socket never backs up
    tokio::spawn(async move {
        let _ = tokio::io::copy(&mut drain, &mut tokio::io::sink()).await;
    });

    // Interleave commands randomly while keeping each command's sequence increasing
    let mut rng = rand::rng();
    let mut next = [1u64; 3];
    let mut sent = Vec::new();
    while sent.len() < (PER_COMMAND as usize) * COMMANDS.len() {
        let pick = rng.random_range(0..COMMANDS.len());
        if next[pick] > PER_COMMAND {
            continue;
        }
        sent.push((COMMANDS[pick].to_string(), next[pick]));
        next[pick] += 1;
    }

    let done = Arc::new(AtomicBool::new(false));
    let violations = Arc::new(Mutex::new(Vec::new()));
    let checker = {
        let log = conn.log().clone();
        let done = done.clone();
        let violations = violations.clone();
        tokio::spawn(async move {
            let mut observations = 0u64;
            while !done.load(Ordering::Acquire) {
                log.with(|view| {
                    for command in COMMANDS {
                        let count = view.count(command);
                        match view.last(command) {
                            Some(last) if sequence_of(last) != count => {
                                violations
                                    .lock()
                                    .push(format!("{command}: count {count}, last {}", sequence_of(last)));
                            }
                            None if count != 0 => {
                                violations.lock().push(format!("{command}: count without last"));
                            }
                            _ => {}
                        }
                    }
                });
                observations += 1;
                tokio::task::yield_now().await;
            }
            observations
        })
    };

    let codec = WireCodec::new(Magic::default());
    for chunk in sent.chunks(97) {
        let mut frames = Vec::new();
        for (command, seq) in chunk {
            frames.extend_from_slice(&codec.encode(&sequenced(command, *seq)).unwrap());
        }
        writer.write_all(&frames).await.unwrap();
    }

    conn.wait_until(
        "all injected messages",
        |view| COMMANDS.iter().all(|c| view.count(c) == PER_COMMAND),
        Duration::from_secs(30),
    )
    .await
    .unwrap();

    done.store(true, Ordering::Release);
    let observations = checker.await.unwrap();
    assert!(observations > 0);
    assert!(violations.lock().is_empty(), "{:?}", violations.lock());

    assert_eq!(*handler.order.lock(), sent);
    assert_eq!(conn.log().total(), PER_COMMAND * COMMANDS.len() as u64);

    conn.close().await;
}
