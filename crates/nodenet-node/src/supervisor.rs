//! Node process lifecycle

use std::collections::BTreeMap;
use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use nodenet_p2p::{Connection, ConnectionId, MessageHandler};
use nodenet_rpc::RpcClient;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};

/// Lifecycle of a supervised node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
}

/// Owns one node process, its RPC client and the P2P connections opened to it
///
/// The child is spawned with `kill_on_drop`, so dropping a supervisor
/// without [`stop`](NodeSupervisor::stop) still terminates the process.
pub struct NodeSupervisor {
    config: NodeConfig,
    state: NodeState,
    child: Option<Child>,
    rpc: RpcClient,
    connections: BTreeMap<ConnectionId, Connection>,
}

impl NodeSupervisor {
    pub fn new(config: NodeConfig) -> Self {
        let rpc = RpcClient::new(config.rpc_addr())
            .with_auth(config.rpc_auth())
            .with_timeout(config.timeouts.rpc());
        Self {
            config,
            state: NodeState::Created,
            child: None,
            rpc,
            connections: BTreeMap::new(),
        }
    }

    /// Create a supervisor and start it; on failure the process is killed
    pub async fn launch(config: NodeConfig) -> NodeResult<Self> {
        let mut node = Self::new(config);
        if let Err(e) = node.start().await {
            if let Err(stop_err) = node.stop(false).await {
                warn!(node = node.index(), error = %stop_err, "Cleanup after failed start failed");
            }
            return Err(e);
        }
        Ok(node)
    }

    pub fn index(&self) -> usize {
        self.config.index
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn p2p_addr(&self) -> SocketAddr {
        self.config.p2p_addr()
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.config.rpc_addr()
    }

    /// OS process id while the child is alive
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// RPC client bound to this node
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Spawn the process and wait until it answers the readiness method
    ///
    /// Output goes to `stdout.log` and `stderr.log` in the data directory.
    #[instrument(skip(self), fields(node = self.config.index))]
    pub async fn start(&mut self) -> NodeResult<()> {
        let node = self.config.index;
        if !matches!(self.state, NodeState::Created | NodeState::Stopped) {
            return Err(NodeError::InvalidState {
                node,
                operation: "start",
                state: self.state,
            });
        }
        self.state = NodeState::Starting;

        let io_err = move |operation: &'static str| {
            move |source: std::io::Error| NodeError::Io {
                node,
                operation,
                source,
            }
        };
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .map_err(io_err("create data directory"))?;
        let stdout = File::create(self.config.data_dir.join("stdout.log"))
            .map_err(io_err("create stdout.log"))?;
        let stderr = File::create(self.config.data_dir.join("stderr.log"))
            .map_err(io_err("create stderr.log"))?;

        let child = Command::new(&self.config.binary)
            .args(self.config.args())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| NodeError::Spawn {
                node,
                binary: self.config.binary.clone(),
                source,
            })?;

        info!(
            pid = child.id(),
            p2p = %self.config.p2p_addr(),
            rpc = %self.config.rpc_addr(),
            "Node process spawned"
        );
        self.child = Some(child);

        self.wait_for_ready().await?;
        self.state = NodeState::Ready;
        info!("Node ready");
        Ok(())
    }

    /// Poll the readiness method until it succeeds, the process exits, or
    /// the startup timeout passes
    ///
    /// Connection failures and the warm-up code mean "not yet"; any other
    /// RPC error is returned as is.
    async fn wait_for_ready(&mut self) -> NodeResult<()> {
        let node = self.config.index;
        let startup = self.config.timeouts.startup();
        let poll = self.config.timeouts.poll_interval();
        let deadline = Instant::now() + startup;
        let mut last_error = String::from("no response yet");

        loop {
            self.check_alive("startup")?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let method = self.config.readiness_method.as_str();
            match timeout(remaining, self.rpc.call(method, vec![])).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) if e.is_warmup() || e.is_unreachable() => {
                    last_error = e.to_string();
                }
                Ok(Err(e)) => {
                    return Err(NodeError::Rpc {
                        node,
                        operation: "readiness check",
                        source: e,
                    });
                }
                Err(_) => last_error = format!("{method}: no answer before deadline"),
            }

            if Instant::now() >= deadline {
                return Err(NodeError::StartupTimeout {
                    node,
                    timeout: startup,
                    last_error,
                });
            }
            sleep(poll).await;
        }
    }

    /// Fail with `ProcessExited` if the child has terminated
    pub fn check_alive(&mut self, operation: &'static str) -> NodeResult<()> {
        let node = self.config.index;
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(status)) => Err(NodeError::ProcessExited {
                node,
                operation,
                status: status.to_string(),
            }),
            Ok(None) => Ok(()),
            Err(source) => Err(NodeError::Io {
                node,
                operation,
                source,
            }),
        }
    }

    /// Record that the network around this node is fully set up
    pub fn mark_running(&mut self) {
        if self.state == NodeState::Ready {
            self.state = NodeState::Running;
        }
    }

    /// Stop the node
    ///
    /// Connections are closed first. With `graceful`, the node is asked to
    /// shut down over RPC and given the shutdown timeout to exit; if it does
    /// not, it is killed and `UngracefulShutdown` is returned. Without
    /// `graceful` the process is killed immediately. Either way the node ends
    /// `Stopped`.
    #[instrument(skip(self), fields(node = self.config.index))]
    pub async fn stop(&mut self, graceful: bool) -> NodeResult<()> {
        let node = self.config.index;
        if matches!(self.state, NodeState::Created | NodeState::Stopped) {
            return Ok(());
        }
        self.state = NodeState::Stopping;
        self.disconnect_p2ps().await;

        let Some(mut child) = self.child.take() else {
            self.state = NodeState::Stopped;
            return Ok(());
        };

        let grace = self.config.timeouts.shutdown();
        let result = if graceful {
            if let Err(e) = self.rpc.stop().await {
                debug!(error = %e, "Shutdown RPC failed");
            }
            match timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(%status, "Node exited");
                    Ok(())
                }
                Ok(Err(source)) => Err(NodeError::Io {
                    node,
                    operation: "wait for exit",
                    source,
                }),
                Err(_) => {
                    warn!(?grace, "Node did not exit in time, killing");
                    if let Err(e) = force_kill(&mut child).await {
                        warn!(error = %e, "Kill failed");
                    }
                    Err(NodeError::UngracefulShutdown {
                        node,
                        timeout: grace,
                    })
                }
            }
        } else {
            force_kill(&mut child).await.map_err(|source| NodeError::Io {
                node,
                operation: "kill",
                source,
            })
        };

        self.state = NodeState::Stopped;
        result
    }

    /// Stop gracefully, then start again with the same configuration
    pub async fn restart(&mut self) -> NodeResult<()> {
        self.stop(true).await?;
        self.start().await
    }

    /// Open a P2P connection from the test driver to this node
    pub async fn add_p2p_connection(
        &mut self,
        handler: Arc<dyn MessageHandler>,
    ) -> NodeResult<Connection> {
        let node = self.config.index;
        if !matches!(self.state, NodeState::Ready | NodeState::Running) {
            return Err(NodeError::InvalidState {
                node,
                operation: "open a P2P connection",
                state: self.state,
            });
        }

        let conn = Connection::open(self.config.p2p_addr(), self.config.connection.clone(), handler)
            .await
            .map_err(|source| NodeError::Connect { node, source })?;
        debug!(node, conn = conn.id(), "P2P connection added");
        self.connections.insert(conn.id(), conn.clone());
        Ok(conn)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Close every P2P connection opened through this supervisor
    pub async fn disconnect_p2ps(&mut self) {
        for (_, conn) in std::mem::take(&mut self.connections) {
            conn.close().await;
        }
    }
}

impl std::fmt::Debug for NodeSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSupervisor")
            .field("index", &self.config.index)
            .field("state", &self.state)
            .field("pid", &self.pid())
            .field("connections", &self.connections.len())
            .finish()
    }
}

async fn force_kill(child: &mut Child) -> std::io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    child.kill().await
}
