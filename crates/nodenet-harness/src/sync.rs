//! State probes for sync barriers
//!
//! A sync barrier polls one [`StateProbe`] on every node of a group until
//! all nodes report the same value. What counts as "the same state" depends
//! on the node implementation, so the probe is pluggable; the default
//! compares best block hashes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use nodenet_core::NodeIndex;
use nodenet_rpc::{RpcClient, RpcError};
use serde_json::Value;

/// Observes one comparable value on a node
#[async_trait]
pub trait StateProbe: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Read the node's current value
    async fn observe(&self, rpc: &RpcClient) -> Result<String, RpcError>;
}

/// Compares `getbestblockhash`
#[derive(Debug, Clone, Copy, Default)]
pub struct BestBlockProbe;

#[async_trait]
impl StateProbe for BestBlockProbe {
    fn name(&self) -> &str {
        "getbestblockhash"
    }

    async fn observe(&self, rpc: &RpcClient) -> Result<String, RpcError> {
        Ok(rpc.get_best_block_hash().await?.to_string())
    }
}

/// Compares `getblockcount`
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockCountProbe;

#[async_trait]
impl StateProbe for BlockCountProbe {
    fn name(&self) -> &str {
        "getblockcount"
    }

    async fn observe(&self, rpc: &RpcClient) -> Result<String, RpcError> {
        Ok(rpc.get_block_count().await?.to_string())
    }
}

/// Compares the result of an arbitrary RPC call
///
/// With a `pointer` (RFC 6901, e.g. `/blocks`) only that part of the result
/// is compared.
#[derive(Debug, Clone)]
pub struct RpcProbe {
    method: String,
    params: Vec<Value>,
    pointer: Option<String>,
}

impl RpcProbe {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Vec::new(),
            pointer: None,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    fn select(&self, result: Value) -> Result<String, RpcError> {
        let Some(pointer) = &self.pointer else {
            return Ok(result.to_string());
        };
        result
            .pointer(pointer)
            .map(Value::to_string)
            .ok_or_else(|| RpcError::InvalidResponse {
                method: self.method.clone(),
                detail: format!("result has no field at {pointer}"),
            })
    }
}

#[async_trait]
impl StateProbe for RpcProbe {
    fn name(&self) -> &str {
        &self.method
    }

    async fn observe(&self, rpc: &RpcClient) -> Result<String, RpcError> {
        let result = rpc.call(&self.method, self.params.clone()).await?;
        self.select(result)
    }
}

/// One poll of a group: the value each node reported, or its error
pub type Observation = BTreeMap<NodeIndex, Result<String, String>>;

/// Whether every node reported the same value
pub fn in_sync(observed: &Observation) -> bool {
    let mut values = observed.values();
    match values.next() {
        Some(Ok(first)) => values.all(|v| matches!(v, Ok(value) if value == first)),
        Some(Err(_)) => false,
        None => true,
    }
}

/// Nodes that disagree with the most common value
///
/// Ties go to the value reported by the lowest node index. Nodes that
/// failed to answer are always divergent.
pub fn divergent_nodes(observed: &Observation) -> Vec<NodeIndex> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in observed.values().filter_map(|v| v.as_ref().ok()) {
        *counts.entry(value.as_str()).or_default() += 1;
    }

    let mut majority: Option<(&str, usize)> = None;
    for value in observed.values().filter_map(|v| v.as_ref().ok()) {
        let count = counts[value.as_str()];
        if majority.is_none_or(|(_, best)| count > best) {
            majority = Some((value.as_str(), count));
        }
    }

    observed
        .iter()
        .filter(|(_, value)| match (value, majority) {
            (Ok(value), Some((best, _))) => value.as_str() != best,
            _ => true,
        })
        .map(|(&node, _)| node)
        .collect()
}

/// Observed values rendered for error messages
pub fn describe(observed: &Observation) -> BTreeMap<NodeIndex, String> {
    observed
        .iter()
        .map(|(&node, value)| {
            let text = match value {
                Ok(value) => value.clone(),
                Err(error) => format!("error: {error}"),
            };
            (node, text)
        })
        .collect()
}
