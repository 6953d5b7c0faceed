//! JSON-RPC over HTTP

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nodenet_wire::Hash256;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::error::RpcError;
use crate::types::{AddNodeCommand, NetworkInfo, PeerInfo};

/// Default bound on a single call
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials sent with every call
#[derive(Debug, Clone, Default)]
pub enum RpcAuth {
    #[default]
    None,
    /// HTTP basic auth with fixed credentials
    UserPass { user: String, password: String },
    /// `user:password` read from a cookie file before each call
    Cookie(PathBuf),
}

impl RpcAuth {
    pub fn user_pass(user: impl Into<String>, password: impl Into<String>) -> Self {
        RpcAuth::UserPass {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn cookie(path: impl Into<PathBuf>) -> Self {
        RpcAuth::Cookie(path.into())
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ErrorObject>,
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Client bound to one node's RPC endpoint
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    auth: RpcAuth,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for the endpoint at `addr`
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_url(format!("http://{addr}/"))
    }

    /// Create a client for an explicit endpoint URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            auth: RpcAuth::None,
            timeout: DEFAULT_RPC_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_auth(mut self, auth: RpcAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call `method` with positional `params`
    ///
    /// Returns the `result` member on success. An error envelope becomes
    /// [`RpcError::Rpc`] whatever the HTTP status; a non-2xx status without
    /// one is a transport failure.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, url = %self.url, "RPC request");

        let request = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body);
        let request = match &self.auth {
            RpcAuth::None => request,
            RpcAuth::UserPass { user, password } => request.basic_auth(user, Some(password)),
            RpcAuth::Cookie(path) => {
                let (user, password) = read_cookie(method, path).await?;
                request.basic_auth(user, Some(password))
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(method, e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(method, e))?;

        let envelope: ResponseEnvelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(RpcError::InvalidResponse {
                    method: method.to_string(),
                    detail: e.to_string(),
                });
            }
            Err(_) => {
                return Err(RpcError::Transport {
                    method: method.to_string(),
                    detail: format!("HTTP {status}"),
                });
            }
        };

        // Servers answer with a null id when they could not read the request id
        let id_matches = envelope.id == json!(id);
        if let Some(error) = envelope.error.filter(|_| id_matches || envelope.id.is_null()) {
            debug!(method, code = error.code, message = %error.message, "RPC error");
            return Err(RpcError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        if !id_matches {
            return Err(RpcError::InvalidResponse {
                method: method.to_string(),
                detail: format!("response id {} does not match request id {id}", envelope.id),
            });
        }

        if !status.is_success() {
            return Err(RpcError::Transport {
                method: method.to_string(),
                detail: format!("HTTP {status} without error object"),
            });
        }

        Ok(envelope.result)
    }

    /// Call `method` and deserialize the result into `T`
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::InvalidResponse {
            method: method.to_string(),
            detail: e.to_string(),
        })
    }

    pub async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call_as("getblockcount", vec![]).await
    }

    pub async fn get_best_block_hash(&self) -> Result<Hash256, RpcError> {
        let hex: String = self.call_as("getbestblockhash", vec![]).await?;
        hex.parse().map_err(|_| RpcError::InvalidResponse {
            method: "getbestblockhash".to_string(),
            detail: format!("not a block hash: {hex}"),
        })
    }

    pub async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, RpcError> {
        self.call_as("getpeerinfo", vec![]).await
    }

    pub async fn get_network_info(&self) -> Result<NetworkInfo, RpcError> {
        self.call_as("getnetworkinfo", vec![]).await
    }

    pub async fn get_connection_count(&self) -> Result<u64, RpcError> {
        self.call_as("getconnectioncount", vec![]).await
    }

    /// Ask the node to open (or forget) an outbound connection to `addr`
    pub async fn add_node(&self, addr: &str, command: AddNodeCommand) -> Result<(), RpcError> {
        self.call("addnode", vec![json!(addr), json!(command.as_str())])
            .await
            .map(|_| ())
    }

    /// Drop the connection to the peer at `addr`
    pub async fn disconnect_node(&self, addr: &str) -> Result<(), RpcError> {
        self.call("disconnectnode", vec![json!(addr)])
            .await
            .map(|_| ())
    }

    /// Submit a serialized block; `Some(reason)` if the node rejected it
    pub async fn submit_block(&self, block_hex: &str) -> Result<Option<String>, RpcError> {
        self.call_as("submitblock", vec![json!(block_hex)]).await
    }

    /// Ask the node to shut down
    pub async fn stop(&self) -> Result<(), RpcError> {
        self.call("stop", vec![]).await.map(|_| ())
    }

    fn transport_error(&self, method: &str, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout {
                method: method.to_string(),
                timeout: self.timeout,
            }
        } else {
            RpcError::Transport {
                method: method.to_string(),
                detail: e.to_string(),
            }
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn read_cookie(method: &str, path: &Path) -> Result<(String, String), RpcError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RpcError::Transport {
            method: method.to_string(),
            detail: format!("cannot read cookie {}: {e}", path.display()),
        })?;
    let (user, password) = contents
        .trim()
        .split_once(':')
        .ok_or_else(|| RpcError::Transport {
            method: method.to_string(),
            detail: format!("malformed cookie {}", path.display()),
        })?;
    Ok((user.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_url() {
        let addr: SocketAddr = "127.0.0.1:18443".parse().unwrap();
        let client = RpcClient::new(addr).with_timeout(Duration::from_secs(2));
        assert_eq!(client.url(), "http://127.0.0.1:18443/");
        assert_eq!(client.timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_read_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cookie");
        std::fs::write(&path, "__cookie__:s3cr3t\n").unwrap();

        let (user, password) = read_cookie("getblockcount", &path).await.unwrap();
        assert_eq!(user, "__cookie__");
        assert_eq!(password, "s3cr3t");
    }

    #[tokio::test]
    async fn test_missing_cookie_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_cookie("stop", &dir.path().join(".cookie"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport { .. }));
    }
}
