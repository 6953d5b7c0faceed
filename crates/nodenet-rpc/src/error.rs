//! RPC error types

use std::time::Duration;

use thiserror::Error;

/// Node is still loading and not yet answering calls
pub const RPC_IN_WARMUP: i64 = -28;
/// Method name not recognised by the node
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// Errors returned by [`RpcClient`](crate::RpcClient) calls
///
/// `Rpc` is the node answering with an error envelope. Every other variant
/// means no usable answer came back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("{method}: RPC error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("{method}: transport error: {detail}")]
    Transport { method: String, detail: String },

    #[error("{method}: no response within {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("{method}: invalid response: {detail}")]
    InvalidResponse { method: String, detail: String },
}

impl RpcError {
    /// The method whose call failed
    pub fn method(&self) -> &str {
        match self {
            RpcError::Rpc { method, .. }
            | RpcError::Transport { method, .. }
            | RpcError::Timeout { method, .. }
            | RpcError::InvalidResponse { method, .. } => method,
        }
    }

    /// Application-level error code, if the node answered with one
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The node is up but still warming up
    pub fn is_warmup(&self) -> bool {
        self.code() == Some(RPC_IN_WARMUP)
    }

    /// The call never produced an answer (connection refused, reset, timeout)
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RpcError::Transport { .. } | RpcError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_accessors() {
        let err = RpcError::Rpc {
            method: "getblock".into(),
            code: -5,
            message: "Block not found".into(),
        };
        assert_eq!(err.method(), "getblock");
        assert_eq!(err.code(), Some(-5));
        assert!(!err.is_warmup());
        assert!(!err.is_unreachable());
        assert_eq!(err.to_string(), "getblock: RPC error -5: Block not found");
    }

    #[test]
    fn test_warmup_detection() {
        let err = RpcError::Rpc {
            method: "getblockcount".into(),
            code: RPC_IN_WARMUP,
            message: "Loading block index...".into(),
        };
        assert!(err.is_warmup());
    }

    #[test]
    fn test_transport_is_unreachable() {
        let err = RpcError::Transport {
            method: "stop".into(),
            detail: "connection refused".into(),
        };
        assert!(err.is_unreachable());
        assert_eq!(err.code(), None);
    }
}
