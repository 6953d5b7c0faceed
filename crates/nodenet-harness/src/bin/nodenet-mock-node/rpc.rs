//! JSON-RPC server of the mock node

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use nodenet_rpc::{NetworkInfo, RPC_IN_WARMUP, RPC_METHOD_NOT_FOUND};
use nodenet_wire::{Block, Hash256};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::chain::Accepted;
use crate::node::MockNode;

const RPC_INVALID_PARAMETER: i64 = -8;
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
const RPC_DESERIALIZATION_ERROR: i64 = -22;
const RPC_CLIENT_NODE_NOT_CONNECTED: i64 = -29;
const RPC_CLIENT_NODE_CONNECT_FAILED: i64 = -31;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

struct Failure {
    status: StatusCode,
    code: i64,
    message: String,
}

impl Failure {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message: message.into(),
        }
    }

    fn not_found(method: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: RPC_METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }
    }
}

pub fn router(node: Arc<MockNode>) -> Router {
    Router::new().route("/", post(handle)).with_state(node)
}

async fn handle(
    State(node): State<Arc<MockNode>>,
    Json(request): Json<Request>,
) -> (StatusCode, Json<Value>) {
    debug!(method = %request.method, "RPC request");
    match dispatch(&node, &request.method, &request.params).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({ "result": result, "error": null, "id": request.id })),
        ),
        Err(failure) => {
            if failure.code != RPC_IN_WARMUP {
                warn!(
                    method = %request.method,
                    code = failure.code,
                    message = %failure.message,
                    "RPC error"
                );
            }
            (
                failure.status,
                Json(json!({
                    "result": null,
                    "error": { "code": failure.code, "message": failure.message },
                    "id": request.id,
                })),
            )
        }
    }
}

async fn dispatch(node: &Arc<MockNode>, method: &str, params: &[Value]) -> Result<Value, Failure> {
    if node.is_warming_up() && method != "stop" {
        return Err(Failure::new(RPC_IN_WARMUP, "Loading block index..."));
    }

    match method {
        "getblockcount" => Ok(json!(node.chain().height())),
        "getbestblockhash" => Ok(json!(node.chain().tip().to_string())),
        "getblockhash" => {
            let height = param_u64(params, 0)?;
            node.chain()
                .hash_at(height)
                .map(|hash| json!(hash.to_string()))
                .ok_or_else(|| Failure::new(RPC_INVALID_PARAMETER, "Block height out of range"))
        }
        "getblock" => {
            let hash = param_hash(params, 0)?;
            let chain = node.chain();
            let (Some(block), Some(height)) = (chain.block(&hash), chain.height_of(&hash)) else {
                return Err(Failure::new(RPC_INVALID_ADDRESS_OR_KEY, "Block not found"));
            };
            Ok(json!({
                "hash": hash.to_string(),
                "height": height,
                "previousblockhash": block.header.prev_blockhash.to_string(),
                "time": block.header.time,
                "nonce": block.header.nonce,
            }))
        }
        "getpeerinfo" => Ok(json!(node.peer_info())),
        "getconnectioncount" => Ok(json!(node.connection_count())),
        "getnetworkinfo" => {
            let config = node.connection_config();
            let info = NetworkInfo {
                version: 10_000,
                subversion: config.user_agent.clone(),
                protocolversion: u64::try_from(config.protocol_version).unwrap_or_default(),
                connections: node.connection_count() as u64,
                localrelay: config.relay,
            };
            Ok(json!(info))
        }
        "addnode" => {
            let addr = param_addr(params, 0)?;
            match param_str(params, 1)? {
                "add" | "onetry" => node.add_node(addr).await.map(|()| Value::Null).map_err(|e| {
                    Failure::new(RPC_CLIENT_NODE_CONNECT_FAILED, e.to_string())
                }),
                "remove" => Ok(Value::Null),
                other => Err(Failure::new(
                    RPC_INVALID_PARAMETER,
                    format!("unknown addnode command: {other}"),
                )),
            }
        }
        "disconnectnode" => {
            let addr = param_addr(params, 0)?;
            if node.disconnect_node(addr).await {
                Ok(Value::Null)
            } else {
                Err(Failure::new(
                    RPC_CLIENT_NODE_NOT_CONNECTED,
                    "Node not found in connected nodes",
                ))
            }
        }
        "submitblock" => {
            let block = Block::from_hex(param_str(params, 0)?).map_err(|e| {
                Failure::new(RPC_DESERIALIZATION_ERROR, format!("Block decode failed: {e}"))
            })?;
            match node.submit_block(block, None) {
                Accepted::Connected(_) => Ok(Value::Null),
                Accepted::Duplicate => Ok(json!("duplicate")),
                Accepted::Orphan => Ok(json!("inconclusive")),
            }
        }
        "generate" => {
            let count = params.first().map_or(Ok(1), |_| param_u64(params, 0))?;
            let hashes: Vec<String> = node
                .generate(count as usize)
                .iter()
                .map(Hash256::to_string)
                .collect();
            Ok(json!(hashes))
        }
        "stop" => {
            node.request_stop();
            Ok(json!("nodenet-mock-node stopping"))
        }
        _ => Err(Failure::not_found(method)),
    }
}

fn param<'a>(params: &'a [Value], index: usize) -> Result<&'a Value, Failure> {
    params
        .get(index)
        .ok_or_else(|| Failure::new(RPC_INVALID_PARAMETER, format!("missing parameter {index}")))
}

fn param_str(params: &[Value], index: usize) -> Result<&str, Failure> {
    param(params, index)?.as_str().ok_or_else(|| {
        Failure::new(RPC_INVALID_PARAMETER, format!("parameter {index} must be a string"))
    })
}

fn param_u64(params: &[Value], index: usize) -> Result<u64, Failure> {
    param(params, index)?.as_u64().ok_or_else(|| {
        Failure::new(
            RPC_INVALID_PARAMETER,
            format!("parameter {index} must be a non-negative integer"),
        )
    })
}

fn param_addr(params: &[Value], index: usize) -> Result<SocketAddr, Failure> {
    param_str(params, index)?
        .parse()
        .map_err(|e| Failure::new(RPC_INVALID_PARAMETER, format!("invalid address: {e}")))
}

fn param_hash(params: &[Value], index: usize) -> Result<Hash256, Failure> {
    param_str(params, index)?
        .parse()
        .map_err(|_| Failure::new(RPC_INVALID_PARAMETER, "invalid block hash"))
}
