//! # Nodenet Harness
//!
//! Orchestrates a fleet of node processes for integration tests.
//!
//! A [`TestHarness`] starts one [`NodeSupervisor`](nodenet_node::NodeSupervisor)
//! per node (in parallel, bounded by `max_parallel_starts`), wires the
//! configured [`Topology`] through the nodes' `addnode` RPC, and offers sync
//! barriers that wait until groups of nodes agree on an observable state.
//! Teardown runs exactly once, stops every node it can, and reports every
//! failure in a [`HarnessReport`] instead of stopping at the first.
//!
//! ## Example
//!
//! ```rust,no_run
//! use nodenet_harness::{HarnessConfig, TestHarness, TopologySpec};
//!
//! # async fn example() {
//! let config = HarnessConfig::new("/usr/local/bin/bitcoind", 3)
//!     .with_topology(TopologySpec::Chain)
//!     .with_common_args(["-regtest"]);
//!
//! let report = TestHarness::run(config, async |harness: &mut TestHarness| {
//!     harness.sync_blocks().await?;
//!     let height = harness.node(0)?.rpc().get_block_count().await?;
//!     assert_eq!(height, 0);
//!     Ok(())
//! })
//! .await;
//!
//! assert!(report.passed(), "{report}");
//! # }
//! ```

pub mod config;
pub mod error;
pub mod harness;
pub mod ports;
pub mod report;
pub mod sync;
pub mod topology;

pub use config::{AuthConfig, ConfigError, HarnessConfig, NetworkName, PortAllocation};
pub use error::{HarnessError, HarnessResult};
pub use harness::{HarnessState, TestHarness};
pub use report::{Failure, FailureKind, HarnessReport};
pub use sync::{BestBlockProbe, BlockCountProbe, RpcProbe, StateProbe};
pub use topology::{Topology, TopologyBuilder, TopologyError, TopologySpec, from_edges};
