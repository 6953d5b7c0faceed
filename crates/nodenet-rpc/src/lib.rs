//! # Nodenet RPC
//!
//! JSON-RPC client for a node's control interface. One [`RpcClient`] is
//! bound to one RPC endpoint and reuses a pooled keep-alive HTTP
//! connection across calls.
//!
//! Calls are never retried: many methods (`submitblock`, `addnode`) are not
//! idempotent, so retry policy belongs to the caller.
//!
//! ```rust,ignore
//! use nodenet_rpc::{RpcAuth, RpcClient};
//!
//! let rpc = RpcClient::new(addr).with_auth(RpcAuth::cookie(datadir.join(".cookie")));
//! let height = rpc.get_block_count().await?;
//! let tip = rpc.get_best_block_hash().await?;
//! let raw: serde_json::Value = rpc.call("getmempoolinfo", vec![]).await?;
//! ```

pub mod client;
pub mod error;
pub mod types;

pub use client::{DEFAULT_RPC_TIMEOUT, RpcAuth, RpcClient};
pub use error::{RPC_IN_WARMUP, RPC_METHOD_NOT_FOUND, RpcError};
pub use types::{AddNodeCommand, NetworkInfo, PeerInfo};
