//! Supervisor lifecycle against stand-in executables

use std::sync::Arc;
use std::time::Duration;

use nodenet_core::TimeoutConfig;
use nodenet_node::{NodeConfig, NodeErrorKind, NodeState, NodeSupervisor};
use nodenet_p2p::NoopHandler;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn quick_timeouts() -> TimeoutConfig {
    TimeoutConfig::fast()
        .with_startup_timeout(Duration::from_millis(500))
        .with_shutdown_timeout(Duration::from_millis(300))
        .with_rpc_timeout(Duration::from_millis(200))
}

/// A script that ignores its arguments and never opens an RPC port
#[cfg(unix)]
fn silent_node(dir: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("silent-node.sh");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_missing_binary_is_spawn_error() {
    nodenet_logging::init_testing();
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig::new(3, dir.path().join("no-such-node"), dir.path().join("node3"))
        .with_ports(free_port(), free_port())
        .with_timeouts(quick_timeouts());
    let mut node = NodeSupervisor::new(config);

    let err = node.start().await.unwrap_err();
    assert_eq!(err.kind(), NodeErrorKind::Spawn);
    assert_eq!(err.node(), 3);
    assert_eq!(node.state(), NodeState::Starting);

    node.stop(true).await.unwrap();
    assert_eq!(node.state(), NodeState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_early_exit_is_detected() {
    nodenet_logging::init_testing();
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("node0");
    let config = NodeConfig::new(0, "true", &data_dir)
        .with_ports(free_port(), free_port())
        .with_timeouts(TimeoutConfig::fast().with_rpc_timeout(Duration::from_millis(200)));
    let mut node = NodeSupervisor::new(config);

    let err = node.start().await.unwrap_err();
    assert_eq!(err.kind(), NodeErrorKind::ProcessExited);
    assert!(data_dir.join("stdout.log").exists());
    assert!(data_dir.join("stderr.log").exists());

    node.stop(false).await.unwrap();
    assert_eq!(node.state(), NodeState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_startup_timeout_then_ungraceful_shutdown() {
    nodenet_logging::init_testing();
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig::new(1, silent_node(dir.path()), dir.path().join("node1"))
        .with_ports(free_port(), free_port())
        .with_timeouts(quick_timeouts());
    let mut node = NodeSupervisor::new(config);

    let err = node.start().await.unwrap_err();
    assert_eq!(err.kind(), NodeErrorKind::StartupTimeout);
    assert!(err.to_string().contains("node1"));
    assert!(node.pid().is_some());

    let err = node.stop(true).await.unwrap_err();
    assert_eq!(err.kind(), NodeErrorKind::UngracefulShutdown);
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(node.pid().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_launch_kills_on_failure() {
    nodenet_logging::init_testing();
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig::new(2, silent_node(dir.path()), dir.path().join("node2"))
        .with_ports(free_port(), free_port())
        .with_timeouts(quick_timeouts());

    let err = NodeSupervisor::launch(config).await.unwrap_err();
    assert_eq!(err.kind(), NodeErrorKind::StartupTimeout);
}

#[tokio::test]
async fn test_connection_requires_ready_node() {
    nodenet_logging::init_testing();
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig::new(0, "node", dir.path());
    let mut node = NodeSupervisor::new(config);

    let err = node
        .add_p2p_connection(Arc::new(NoopHandler))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), NodeErrorKind::InvalidState);

    // Never started: stopping is a no-op
    node.stop(true).await.unwrap();
    assert_eq!(node.state(), NodeState::Created);
}
