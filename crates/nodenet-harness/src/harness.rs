//! The test harness
//!
//! State machine:
//!
//! ```text
//! Unconfigured --setup_network--> NetworkUp --run--> TestRunning
//!       |                             |                   |
//!       +------(setup failure)--------+-----teardown------+--> TearingDown --> Torn
//! ```
//!
//! Teardown runs once. Later calls return the report recorded the first time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use nodenet_core::{NodeIndex, wait_until_async};
use nodenet_node::{NodeConfig, NodeError, NodeState, NodeSupervisor};
use nodenet_p2p::{Connection, ConnectionConfig, MessageHandler};
use nodenet_rpc::{AddNodeCommand, PeerInfo, RpcClient, RpcError};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::ports;
use crate::report::{Failure, HarnessReport};
use crate::sync::{self, BestBlockProbe, Observation, StateProbe};
use crate::topology::Topology;

/// Lifecycle of a [`TestHarness`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Unconfigured,
    NetworkUp,
    TestRunning,
    TearingDown,
    Torn,
}

enum DataRoot {
    Temp(TempDir),
    Fixed(PathBuf),
}

impl DataRoot {
    fn path(&self) -> &Path {
        match self {
            DataRoot::Temp(dir) => dir.path(),
            DataRoot::Fixed(path) => path,
        }
    }
}

/// Owns every node of a test network
pub struct TestHarness {
    config: HarnessConfig,
    state: HarnessState,
    nodes: Vec<NodeSupervisor>,
    /// Connections currently established between nodes
    topology: Topology,
    data_root: Option<DataRoot>,
    failures: Vec<Failure>,
}

impl TestHarness {
    pub fn new(config: HarnessConfig) -> HarnessResult<Self> {
        config.validate()?;
        Ok(Self {
            topology: Topology::new(config.num_nodes),
            config,
            state: HarnessState::Unconfigured,
            nodes: Vec::new(),
            data_root: None,
            failures: Vec::new(),
        })
    }

    /// Set up a network, run `test` against it, and tear it down
    ///
    /// Teardown happens whatever the test returns; every failure along the
    /// way ends up in the report.
    pub async fn run<F>(config: HarnessConfig, test: F) -> HarnessReport
    where
        F: AsyncFnOnce(&mut TestHarness) -> HarnessResult<()>,
    {
        let mut harness = match TestHarness::new(config) {
            Ok(harness) => harness,
            Err(error) => return HarnessReport::new(error.failures("configure")),
        };

        if harness.setup_network().await.is_ok() {
            harness.state = HarnessState::TestRunning;
            if let Err(error) = test(&mut harness).await {
                warn!(%error, "Test failed");
                harness.failures.extend(error.failures("test"));
            }
        }

        match harness.teardown().await {
            Ok(report) | Err(HarnessError::Failed(report)) => report,
            Err(error) => HarnessReport::new(error.failures("teardown")),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    pub fn num_nodes(&self) -> usize {
        self.config.num_nodes
    }

    /// Node-to-node connections currently in place
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Parent of the node data directories, once set up
    pub fn data_root(&self) -> Option<&Path> {
        self.data_root.as_ref().map(DataRoot::path)
    }

    pub fn nodes(&self) -> &[NodeSupervisor] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> HarnessResult<&NodeSupervisor> {
        let count = self.nodes.len();
        self.nodes
            .get(index)
            .ok_or(HarnessError::NodeOutOfRange { index, count })
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> HarnessResult<&mut NodeSupervisor> {
        let count = self.nodes.len();
        self.nodes
            .get_mut(index)
            .ok_or(HarnessError::NodeOutOfRange { index, count })
    }

    pub fn rpc(&self, index: NodeIndex) -> HarnessResult<&RpcClient> {
        Ok(self.node(index)?.rpc())
    }

    /// Open a P2P connection from the test driver to a node
    pub async fn add_p2p_connection(
        &mut self,
        index: NodeIndex,
        handler: Arc<dyn MessageHandler>,
    ) -> HarnessResult<Connection> {
        self.require_up("open a P2P connection")?;
        Ok(self.node_mut(index)?.add_p2p_connection(handler).await?)
    }

    /// Failures recorded so far
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    fn require_up(&self, operation: &'static str) -> HarnessResult<()> {
        match self.state {
            HarnessState::NetworkUp | HarnessState::TestRunning => Ok(()),
            state => Err(HarnessError::InvalidState { operation, state }),
        }
    }

    fn check_index(&self, index: NodeIndex) -> HarnessResult<()> {
        self.node(index).map(|_| ())
    }

    /// Start every node and wire up the configured topology
    ///
    /// On failure every node started so far is stopped, the failure is
    /// recorded, and the harness ends `Torn`.
    #[instrument(skip(self), fields(nodes = self.config.num_nodes, topology = %self.config.topology))]
    pub async fn setup_network(&mut self) -> HarnessResult<()> {
        if self.state != HarnessState::Unconfigured {
            return Err(HarnessError::InvalidState {
                operation: "set up the network",
                state: self.state,
            });
        }

        match self.bring_up().await {
            Ok(()) => {
                self.state = HarnessState::NetworkUp;
                info!(edges = self.topology.edge_count(), "Network up");
                Ok(())
            }
            Err(error) => {
                warn!(%error, "Setup failed, rolling back");
                self.failures.extend(error.failures("setup"));
                self.shutdown_all().await;
                Err(error)
            }
        }
    }

    async fn bring_up(&mut self) -> HarnessResult<()> {
        let root = self.create_data_root()?;
        let count = self.config.num_nodes;
        let ports = ports::allocate(&self.config.ports, self.config.host, count).map_err(
            |source| HarnessError::Io {
                operation: "allocate ports",
                source,
            },
        )?;

        let connection = ConnectionConfig::default()
            .with_magic(self.config.network.magic())
            .with_connect_timeout(self.config.timeouts.connect())
            .with_poll_interval(self.config.timeouts.poll_interval());

        self.nodes = ports
            .iter()
            .enumerate()
            .map(|(index, ports)| {
                let mut config =
                    NodeConfig::new(index, &self.config.binary, root.join(format!("node{index}")))
                        .with_ports(ports.p2p, ports.rpc)
                        .with_args(self.config.node_args(index))
                        .with_readiness_method(self.config.readiness_method.clone())
                        .with_auth((&self.config.auth).into())
                        .with_timeouts(self.config.timeouts.clone())
                        .with_connection(connection.clone());
                config.host = self.config.host;
                NodeSupervisor::new(config)
            })
            .collect();

        self.start_all().await?;

        let topology = self.config.topology.build(count)?;
        for &(from, to) in topology.edges() {
            self.connect_nodes(from, to).await?;
        }

        for node in &mut self.nodes {
            node.mark_running();
        }
        Ok(())
    }

    fn create_data_root(&mut self) -> HarnessResult<PathBuf> {
        let root = match &self.config.data_root {
            Some(path) => {
                std::fs::create_dir_all(path).map_err(|source| HarnessError::Io {
                    operation: "create data root",
                    source,
                })?;
                DataRoot::Fixed(path.clone())
            }
            None => DataRoot::Temp(TempDir::with_prefix("nodenet-").map_err(|source| {
                HarnessError::Io {
                    operation: "create temporary data root",
                    source,
                }
            })?),
        };
        let path = root.path().to_path_buf();
        debug!(root = %path.display(), "Data root ready");
        self.data_root = Some(root);
        Ok(path)
    }

    /// Start nodes, at most `max_parallel_starts` at once
    ///
    /// Returns at the first failure; starts still in flight are dropped and
    /// their processes stopped by the rollback.
    async fn start_all(&mut self) -> HarnessResult<()> {
        let limit = self.config.max_parallel_starts;
        let mut starts = stream::iter(self.nodes.iter_mut())
            .map(|node| async move { node.start().await })
            .buffer_unordered(limit);

        while let Some(result) = starts.next().await {
            result?;
        }
        Ok(())
    }

    /// Connect node `from` to node `to` and wait until both see the handshake
    #[instrument(skip(self))]
    pub async fn connect(&mut self, from: NodeIndex, to: NodeIndex) -> HarnessResult<()> {
        self.require_up("connect nodes")?;
        self.check_index(from)?;
        self.check_index(to)?;
        self.connect_nodes(from, to).await
    }

    async fn connect_nodes(&mut self, from: NodeIndex, to: NodeIndex) -> HarnessResult<()> {
        if self.topology.are_connected(from, to) {
            return Ok(());
        }
        // Validates the pair before touching any node
        let mut topology = self.topology.clone();
        topology.connect(from, to)?;

        let target = self.nodes[to].p2p_addr().to_string();
        let from_rpc = self.nodes[from].rpc();
        let to_rpc = self.nodes[to].rpc();
        let before = handshaked_inbound(&peer_info(to, to_rpc).await?);

        from_rpc
            .add_node(&target, AddNodeCommand::OneTry)
            .await
            .map_err(|source| NodeError::Rpc {
                node: from,
                operation: "addnode",
                source,
            })?;

        let target = target.as_str();
        let timeout = self.config.timeouts.connect();
        wait_until_async(
            move || async move {
                let (Ok(outbound), Ok(inbound)) =
                    (from_rpc.get_peer_info().await, to_rpc.get_peer_info().await)
                else {
                    return false;
                };
                outbound
                    .iter()
                    .any(|p| !p.inbound && p.addr == target && p.version != 0)
                    && handshaked_inbound(&inbound) > before
            },
            timeout,
            self.config.timeouts.poll_interval(),
        )
        .await
        .map_err(|_| HarnessError::PeerTimeout {
            operation: "connect",
            from,
            to,
            timeout,
        })?;

        self.topology = topology;
        debug!(from, to, "Nodes connected");
        Ok(())
    }

    /// Drop the connection between two nodes, whichever side opened it
    ///
    /// Fails with `NotConnected` if the harness did not connect the pair.
    #[instrument(skip(self))]
    pub async fn disconnect(&mut self, a: NodeIndex, b: NodeIndex) -> HarnessResult<()> {
        self.require_up("disconnect nodes")?;
        self.check_index(a)?;
        self.check_index(b)?;
        if !self.topology.are_connected(a, b) {
            return Err(HarnessError::NotConnected { a, b });
        }

        let (from, to) = if self.topology.edges().contains(&(b, a)) {
            (b, a)
        } else {
            (a, b)
        };
        let target = self.nodes[to].p2p_addr().to_string();
        let from_rpc = self.nodes[from].rpc();
        let to_rpc = self.nodes[to].rpc();
        let before = handshaked_inbound(&peer_info(to, to_rpc).await?);

        from_rpc
            .disconnect_node(&target)
            .await
            .map_err(|source| NodeError::Rpc {
                node: from,
                operation: "disconnectnode",
                source,
            })?;

        let target = target.as_str();
        let timeout = self.config.timeouts.connect();
        wait_until_async(
            move || async move {
                let (Ok(outbound), Ok(inbound)) =
                    (from_rpc.get_peer_info().await, to_rpc.get_peer_info().await)
                else {
                    return false;
                };
                !outbound.iter().any(|p| !p.inbound && p.addr == target)
                    && handshaked_inbound(&inbound) < before
            },
            timeout,
            self.config.timeouts.poll_interval(),
        )
        .await
        .map_err(|_| HarnessError::PeerTimeout {
            operation: "disconnect",
            from,
            to,
            timeout,
        })?;

        self.topology.disconnect(a, b);
        debug!(from, to, "Nodes disconnected");
        Ok(())
    }

    /// Wait until each group agrees on its best block
    pub async fn sync_all(&self, groups: &[Vec<NodeIndex>]) -> HarnessResult<()> {
        self.sync_all_with(groups, &BestBlockProbe, self.config.timeouts.sync())
            .await
    }

    /// Wait until every node agrees on its best block
    pub async fn sync_blocks(&self) -> HarnessResult<()> {
        let all: Vec<NodeIndex> = (0..self.nodes.len()).collect();
        self.sync_all(&[all]).await
    }

    /// Wait until each group agrees on `probe`, one group after another
    pub async fn sync_all_with(
        &self,
        groups: &[Vec<NodeIndex>],
        probe: &dyn StateProbe,
        timeout: Duration,
    ) -> HarnessResult<()> {
        self.require_up("sync nodes")?;
        for &index in groups.iter().flatten() {
            self.check_index(index)?;
        }
        for group in groups {
            self.sync_group(group, probe, timeout).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, probe), fields(probe = probe.name()))]
    async fn sync_group(
        &self,
        group: &[NodeIndex],
        probe: &dyn StateProbe,
        timeout: Duration,
    ) -> HarnessResult<()> {
        let last = Mutex::new(Observation::new());
        let last_ref = &last;

        let result = wait_until_async(
            move || async move {
                let observed = self.observe(group, probe).await;
                let synced = sync::in_sync(&observed);
                *last_ref.lock() = observed;
                synced
            },
            timeout,
            self.config.timeouts.poll_interval(),
        )
        .await;

        match result {
            Ok(()) => {
                debug!("Group in sync");
                Ok(())
            }
            Err(_) => {
                let observed = last.into_inner();
                let divergent = sync::divergent_nodes(&observed);
                warn!(?divergent, "Sync timed out");
                Err(HarnessError::SyncTimeout {
                    probe: probe.name().to_string(),
                    group: group.to_vec(),
                    divergent,
                    observed: sync::describe(&observed),
                    timeout,
                })
            }
        }
    }

    async fn observe(&self, group: &[NodeIndex], probe: &dyn StateProbe) -> Observation {
        let reads = group.iter().map(|&index| async move {
            let value = probe
                .observe(self.nodes[index].rpc())
                .await
                .map_err(|e| e.to_string());
            (index, value)
        });
        futures::future::join_all(reads).await.into_iter().collect()
    }

    /// Stop every node and report all failures
    ///
    /// Nodes that never became ready are killed; the others are asked to
    /// shut down. Failures are collected, never raised per node. Safe to call
    /// in any state; only the first call does any work.
    #[instrument(skip(self))]
    pub async fn teardown(&mut self) -> HarnessResult<HarnessReport> {
        if self.state != HarnessState::Torn {
            self.shutdown_all().await;
        }
        let report = HarnessReport::new(self.failures.clone());
        if report.passed() {
            Ok(report)
        } else {
            Err(HarnessError::Failed(report))
        }
    }

    async fn shutdown_all(&mut self) {
        self.state = HarnessState::TearingDown;
        info!(nodes = self.nodes.len(), "Tearing down");

        let limit = self.config.max_parallel_starts;
        let mut failures: Vec<Failure> = stream::iter(self.nodes.iter_mut())
            .map(|node| async move { stop_node(node).await })
            .buffer_unordered(limit)
            .flat_map(stream::iter)
            .collect()
            .await;
        failures.sort_by_key(|f| f.node);
        self.failures.extend(failures);

        self.topology = Topology::new(self.config.num_nodes);
        self.release_data_root();
        self.state = HarnessState::Torn;
        info!(failures = self.failures.len(), "Teardown complete");
    }

    fn release_data_root(&mut self) {
        let Some(root) = self.data_root.take() else {
            return;
        };
        if self.config.keep_data_dirs {
            let path = match root {
                DataRoot::Temp(dir) => dir.keep(),
                DataRoot::Fixed(path) => path,
            };
            info!(root = %path.display(), "Keeping node data directories");
            return;
        }
        match root {
            DataRoot::Temp(dir) => {
                if let Err(e) = dir.close() {
                    warn!(error = %e, "Failed to remove data root");
                }
            }
            DataRoot::Fixed(_) => {
                for node in &self.nodes {
                    if let Err(e) = std::fs::remove_dir_all(node.data_dir()) {
                        debug!(node = node.index(), error = %e, "Failed to remove data dir");
                    }
                }
            }
        }
    }
}

/// Stop one node during teardown, returning what went wrong
async fn stop_node(node: &mut NodeSupervisor) -> Vec<Failure> {
    let mut failures = Vec::new();
    let result = match node.state() {
        NodeState::Created | NodeState::Stopped => return failures,
        // Never became ready, its startup failure is already recorded
        NodeState::Starting => node.stop(false).await,
        NodeState::Ready | NodeState::Running | NodeState::Stopping => {
            if let Err(e) = node.check_alive("teardown") {
                warn!(node = node.index(), error = %e, "Node died before teardown");
                failures.push(Failure::from_node_error("teardown", &e));
            }
            node.stop(true).await
        }
    };
    if let Err(e) = result {
        warn!(node = node.index(), error = %e, "Shutdown failed");
        failures.push(Failure::from_node_error("teardown", &e));
    }
    failures
}

async fn peer_info(node: NodeIndex, rpc: &RpcClient) -> HarnessResult<Vec<PeerInfo>> {
    rpc.get_peer_info()
        .await
        .map_err(|source: RpcError| {
            NodeError::Rpc {
                node,
                operation: "getpeerinfo",
                source,
            }
            .into()
        })
}

/// Inbound peers that finished the version handshake
fn handshaked_inbound(peers: &[PeerInfo]) -> usize {
    peers.iter().filter(|p| p.inbound && p.version != 0).count()
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if self.state != HarnessState::Torn && !self.nodes.is_empty() {
            warn!(state = ?self.state, "Harness dropped without teardown; killing nodes");
        }
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("state", &self.state)
            .field("nodes", &self.nodes)
            .field("edges", &self.topology.edges())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologySpec;

    #[tokio::test]
    async fn test_operations_require_network() {
        let mut harness = TestHarness::new(HarnessConfig::new("node", 2)).unwrap();
        assert_eq!(harness.state(), HarnessState::Unconfigured);

        assert!(matches!(
            harness.connect(0, 1).await,
            Err(HarnessError::InvalidState {
                state: HarnessState::Unconfigured,
                ..
            })
        ));
        assert!(matches!(
            harness.sync_blocks().await,
            Err(HarnessError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = HarnessConfig::new("node", 2).with_topology(TopologySpec::Edges {
            edges: vec![(0, 2)],
        });
        assert!(matches!(
            TestHarness::new(config),
            Err(HarnessError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_teardown_before_setup_is_clean() {
        let mut harness = TestHarness::new(HarnessConfig::new("node", 2)).unwrap();
        let report = harness.teardown().await.unwrap();
        assert!(report.passed());
        assert_eq!(harness.state(), HarnessState::Torn);

        // Torn is terminal
        assert!(matches!(
            harness.setup_network().await,
            Err(HarnessError::InvalidState {
                state: HarnessState::Torn,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_setup() {
        let config = HarnessConfig::new("/nonexistent/nodenet-node-binary", 2);
        let mut harness = TestHarness::new(config).unwrap();

        let err = harness.setup_network().await.unwrap_err();
        assert!(matches!(err, HarnessError::Node(NodeError::Spawn { .. })));
        assert_eq!(harness.state(), HarnessState::Torn);

        let Err(HarnessError::Failed(report)) = harness.teardown().await else {
            panic!("teardown should report the spawn failure");
        };
        assert!(!report.passed());
        assert!(
            report
                .failures()
                .iter()
                .all(|f| f.kind == crate::report::FailureKind::Spawn)
        );
    }

    #[tokio::test]
    async fn test_run_reports_setup_failure() {
        let config = HarnessConfig::new("/nonexistent/nodenet-node-binary", 1);
        let mut ran = false;
        let report = TestHarness::run(config, async |_harness: &mut TestHarness| {
            ran = true;
            Ok(())
        })
        .await;

        assert!(!ran);
        assert!(report.has_failure(Some(0), crate::report::FailureKind::Spawn));
    }
}
