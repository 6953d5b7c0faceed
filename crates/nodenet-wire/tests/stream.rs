//! Stream-level properties of the frame codec
//!
//! A receive loop sees arbitrary fragments of a byte stream; these tests
//! feed concatenated frames through the codec the same way.

use bytes::{Buf, Bytes, BytesMut};
use rand::Rng;

use nodenet_wire::{
    Block, BlockHeader, DecodeError, DecodeStatus, Hash256, Inventory, Message, Network,
    Transaction, WireCodec,
};

fn codec() -> WireCodec {
    WireCodec::new(Network::Regtest.magic())
}

fn random_message(rng: &mut impl Rng, i: u32) -> Message {
    let hash = Hash256::hash(&i.to_le_bytes());
    match rng.random_range(0..8) {
        0 => Message::Ping(rng.random()),
        1 => Message::Pong(rng.random()),
        2 => Message::Inv(vec![Inventory::block(hash)]),
        3 => Message::GetData(vec![Inventory::block(hash), Inventory::tx(hash)]),
        4 => Message::Block(Block::new(
            BlockHeader {
                version: 1,
                prev_blockhash: hash,
                merkle_root: Hash256::ZERO,
                time: i,
                bits: 0x207f_ffff,
                nonce: rng.random(),
            },
            vec![0u8; rng.random_range(0..64)],
        )),
        5 => Message::Tx(Transaction::new(vec![7u8; rng.random_range(1..32)])),
        6 => Message::Verack,
        _ => Message::Unknown {
            command: "sendcmpct".to_string(),
            payload: Bytes::from(vec![1u8; 9]),
        },
    }
}

/// Decode everything available, the way a receive loop drains its buffer
fn drain(buf: &mut BytesMut, out: &mut Vec<Message>) -> Result<(), DecodeError> {
    loop {
        match codec().decode(buf)? {
            DecodeStatus::Complete { message, consumed } => {
                buf.advance(consumed);
                out.push(message);
            }
            DecodeStatus::NeedMoreData => return Ok(()),
        }
    }
}

#[test]
fn test_concatenated_frames_decode_in_order() {
    let mut rng = rand::rng();
    let messages: Vec<Message> = (0..200).map(|i| random_message(&mut rng, i)).collect();

    let mut stream = BytesMut::new();
    for message in &messages {
        codec().encode_into(message, &mut stream).unwrap();
    }

    let mut decoded = Vec::new();
    drain(&mut stream, &mut decoded).unwrap();

    assert_eq!(decoded, messages);
    assert!(stream.is_empty());
}

#[test]
fn test_fragmented_delivery() {
    let mut rng = rand::rng();
    let messages: Vec<Message> = (0..50).map(|i| random_message(&mut rng, i)).collect();

    let mut wire = BytesMut::new();
    for message in &messages {
        codec().encode_into(message, &mut wire).unwrap();
    }
    let wire = wire.freeze();

    // Deliver the stream in random-sized chunks, including single bytes
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    let mut offset = 0;
    while offset < wire.len() {
        let chunk = rng.random_range(1..=37).min(wire.len() - offset);
        buf.extend_from_slice(&wire[offset..offset + chunk]);
        offset += chunk;
        drain(&mut buf, &mut decoded).unwrap();
    }

    assert_eq!(decoded, messages);
    assert!(buf.is_empty());
}

#[test]
fn test_partial_frame_consumes_nothing() {
    let frame = codec().encode(&Message::Ping(5)).unwrap();
    let mut buf = BytesMut::from(&frame[..frame.len() - 1]);

    let mut decoded = Vec::new();
    drain(&mut buf, &mut decoded).unwrap();
    assert!(decoded.is_empty());
    assert_eq!(buf.len(), frame.len() - 1);

    // The same buffer decodes once the last byte lands
    buf.extend_from_slice(&frame[frame.len() - 1..]);
    drain(&mut buf, &mut decoded).unwrap();
    assert_eq!(decoded, vec![Message::Ping(5)]);
}

#[test]
fn test_corrupted_checksum_stops_at_bad_frame() {
    let first = codec().encode(&Message::Ping(1)).unwrap();
    let mut second = codec().encode(&Message::Ping(2)).unwrap().to_vec();
    let third = codec().encode(&Message::Ping(3)).unwrap();
    second[20] ^= 0x01;

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&first);
    buf.extend_from_slice(&second);
    buf.extend_from_slice(&third);

    let mut decoded = Vec::new();
    let err = drain(&mut buf, &mut decoded).unwrap_err();

    assert!(matches!(err, DecodeError::Checksum { .. }));
    // Only the intact leading frame was delivered, and the buffer still
    // starts at the corrupted frame
    assert_eq!(decoded, vec![Message::Ping(1)]);
    assert_eq!(buf.len(), second.len() + third.len());
}
