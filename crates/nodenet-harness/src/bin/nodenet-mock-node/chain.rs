//! In-memory block tree
//!
//! No validation beyond linkage: a block is connected once its parent is
//! known, and the highest block wins (first seen on ties).

use std::collections::HashMap;

use nodenet_wire::{Block, BlockHeader, Hash256};

/// Regtest-style difficulty bits
const GENESIS_BITS: u32 = 0x207f_ffff;
const GENESIS_TIME: u32 = 1_296_688_602;

/// Result of offering a block to the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    Duplicate,
    /// Parent unknown; kept until it arrives
    Orphan,
    /// Newly connected blocks, parents before children
    Connected(Vec<Hash256>),
}

struct Entry {
    block: Block,
    height: u64,
}

pub struct Chain {
    blocks: HashMap<Hash256, Entry>,
    /// Orphans keyed by the parent they wait for
    orphans: HashMap<Hash256, Vec<Block>>,
    tip: Hash256,
}

impl Chain {
    pub fn new() -> Self {
        let genesis = genesis_block();
        let hash = genesis.block_hash();
        let mut blocks = HashMap::new();
        blocks.insert(
            hash,
            Entry {
                block: genesis,
                height: 0,
            },
        );
        Self {
            blocks,
            orphans: HashMap::new(),
            tip: hash,
        }
    }

    pub fn tip(&self) -> Hash256 {
        self.tip
    }

    pub fn height(&self) -> u64 {
        self.blocks.get(&self.tip).map_or(0, |e| e.height)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn block(&self, hash: &Hash256) -> Option<&Block> {
        self.blocks.get(hash).map(|e| &e.block)
    }

    pub fn height_of(&self, hash: &Hash256) -> Option<u64> {
        self.blocks.get(hash).map(|e| e.height)
    }

    /// Hashes of the active chain above genesis, lowest first
    pub fn active_chain(&self) -> Vec<Hash256> {
        let mut hashes = Vec::new();
        let mut cursor = self.tip;
        while let Some(entry) = self.blocks.get(&cursor) {
            if entry.height == 0 {
                break;
            }
            hashes.push(cursor);
            cursor = entry.block.header.prev_blockhash;
        }
        hashes.reverse();
        hashes
    }

    /// Hash of the active-chain block at `height`
    pub fn hash_at(&self, height: u64) -> Option<Hash256> {
        if height > self.height() {
            return None;
        }
        let mut cursor = self.tip;
        loop {
            let entry = self.blocks.get(&cursor)?;
            if entry.height == height {
                return Some(cursor);
            }
            cursor = entry.block.header.prev_blockhash;
        }
    }

    pub fn accept(&mut self, block: Block) -> Accepted {
        let hash = block.block_hash();
        if self.blocks.contains_key(&hash) {
            return Accepted::Duplicate;
        }
        let parent = block.header.prev_blockhash;
        if !self.blocks.contains_key(&parent) {
            let waiting = self.orphans.entry(parent).or_default();
            if !waiting.iter().any(|b| b.block_hash() == hash) {
                waiting.push(block);
            }
            return Accepted::Orphan;
        }

        let mut connected = Vec::new();
        let mut pending = vec![block];
        while let Some(block) = pending.pop() {
            let hash = block.block_hash();
            let Some(height) = self
                .blocks
                .get(&block.header.prev_blockhash)
                .map(|p| p.height + 1)
            else {
                continue;
            };
            self.blocks.insert(hash, Entry { block, height });
            if height > self.height() {
                self.tip = hash;
            }
            connected.push(hash);
            if let Some(children) = self.orphans.remove(&hash) {
                pending.extend(children);
            }
        }
        Accepted::Connected(connected)
    }

    /// Build and connect `count` blocks on the tip
    pub fn mine(&mut self, count: usize) -> Vec<Block> {
        let mut mined = Vec::with_capacity(count);
        for _ in 0..count {
            let parent = self.tip;
            let time = self
                .block(&parent)
                .map_or(GENESIS_TIME, |b| b.header.time.saturating_add(1));
            let height = self.height() + 1;
            let nonce: u32 = rand::random();
            let seed = [height.to_le_bytes().as_slice(), nonce.to_le_bytes().as_slice()].concat();
            let header = BlockHeader {
                version: 4,
                prev_blockhash: parent,
                merkle_root: Hash256::hash(&seed),
                time,
                bits: GENESIS_BITS,
                nonce,
            };
            let block = Block::new(header, Vec::<u8>::new());
            self.accept(block.clone());
            mined.push(block);
        }
        mined
    }
}

fn genesis_block() -> Block {
    let header = BlockHeader {
        version: 1,
        prev_blockhash: Hash256::default(),
        merkle_root: Hash256::hash(b"nodenet genesis"),
        time: GENESIS_TIME,
        bits: GENESIS_BITS,
        nonce: 2,
    };
    Block::new(header, Vec::<u8>::new())
}
