//! Network topology definitions
//!
//! Provides the peer graphs a harness can wire up:
//! - None: isolated nodes
//! - Chain: each node connected to the next
//! - Ring: a chain closed back to node 0
//! - Star: one center connected to every other node
//! - Full mesh: every node connected to every other
//! - Random: configurable connection probability
//! - Custom: explicit edge list
//!
//! Edges are directed in the sense that `(a, b)` means node `a` opens the
//! connection to node `b`; adjacency is symmetric.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use nodenet_core::NodeIndex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors building a topology
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("edge ({a}, {b}) references node {} but the network has {count} nodes", a.max(b))]
    NodeOutOfRange {
        a: NodeIndex,
        b: NodeIndex,
        count: usize,
    },

    #[error("node {0} cannot connect to itself")]
    SelfLoop(NodeIndex),

    #[error("star center {center} is out of range for {count} nodes")]
    CenterOutOfRange { center: NodeIndex, count: usize },

    #[error("unknown topology preset: {0}")]
    UnknownPreset(String),
}

/// A peer graph over `node_count` nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    node_count: usize,
    /// Edges in the order they are applied
    edges: Vec<(NodeIndex, NodeIndex)>,
    adjacency: BTreeMap<NodeIndex, BTreeSet<NodeIndex>>,
}

impl Topology {
    /// Create a topology with no edges
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            edges: Vec::new(),
            adjacency: (0..node_count).map(|i| (i, BTreeSet::new())).collect(),
        }
    }

    /// Add a connection from `a` to `b`; duplicates in either direction are ignored
    pub fn connect(&mut self, a: NodeIndex, b: NodeIndex) -> Result<(), TopologyError> {
        if a >= self.node_count || b >= self.node_count {
            return Err(TopologyError::NodeOutOfRange {
                a,
                b,
                count: self.node_count,
            });
        }
        if a == b {
            return Err(TopologyError::SelfLoop(a));
        }
        if self.are_connected(a, b) {
            return Ok(());
        }

        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
        self.edges.push((a, b));
        Ok(())
    }

    /// Remove the connection between `a` and `b`, whichever side opened it
    pub fn disconnect(&mut self, a: NodeIndex, b: NodeIndex) {
        self.edges
            .retain(|&(x, y)| !((x == a && y == b) || (x == b && y == a)));
        if let Some(neighbors) = self.adjacency.get_mut(&a) {
            neighbors.remove(&b);
        }
        if let Some(neighbors) = self.adjacency.get_mut(&b) {
            neighbors.remove(&a);
        }
    }

    /// Get all neighbors of a node
    pub fn neighbors(&self, node: NodeIndex) -> Option<&BTreeSet<NodeIndex>> {
        self.adjacency.get(&node)
    }

    /// Check if two nodes are directly connected
    pub fn are_connected(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.adjacency
            .get(&a)
            .map(|neighbors| neighbors.contains(&b))
            .unwrap_or(false)
    }

    pub fn edges(&self) -> &[(NodeIndex, NodeIndex)] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Connected components, each sorted, in order of their lowest node
    pub fn components(&self) -> Vec<Vec<NodeIndex>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for start in 0..self.node_count {
            if !seen.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                for &next in self.adjacency.get(&node).into_iter().flatten() {
                    if seen.insert(next) {
                        component.push(next);
                        stack.push(next);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    /// Print a simple ASCII visualization of the topology
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count));
        output.push_str(&format!("  Edges: {}\n\n", self.edge_count()));

        for (node, neighbors) in &self.adjacency {
            let neighbor_str: Vec<String> = neighbors.iter().map(|n| format!("node{n}")).collect();
            output.push_str(&format!("  node{} -> [{}]\n", node, neighbor_str.join(", ")));
        }
        output
    }
}

/// Builder for preset topologies
pub struct TopologyBuilder {
    node_count: usize,
}

impl TopologyBuilder {
    pub fn new(node_count: usize) -> Self {
        Self { node_count }
    }

    /// Build a chain: 0 - 1 - 2 - ... - n-1
    pub fn chain(self) -> Topology {
        let mut topology = Topology::new(self.node_count);
        for i in 1..self.node_count {
            topology.add_preset_edge(i - 1, i);
        }
        topology
    }

    /// Build a ring: a chain with n-1 connected back to 0
    pub fn ring(self) -> Topology {
        let mut topology = self.chain();
        if topology.node_count > 2 {
            topology.add_preset_edge(topology.node_count - 1, 0);
        }
        topology
    }

    /// Build a star around `center`
    pub fn star(self, center: NodeIndex) -> Result<Topology, TopologyError> {
        if center >= self.node_count {
            return Err(TopologyError::CenterOutOfRange {
                center,
                count: self.node_count,
            });
        }
        let mut topology = Topology::new(self.node_count);
        for node in (0..self.node_count).filter(|&n| n != center) {
            topology.add_preset_edge(node, center);
        }
        Ok(topology)
    }

    /// Build a full mesh where every node is connected to every other
    pub fn full_mesh(self) -> Topology {
        let mut topology = Topology::new(self.node_count);
        for i in 0..self.node_count {
            for j in (i + 1)..self.node_count {
                topology.add_preset_edge(i, j);
            }
        }
        topology
    }

    /// Build a random mesh with the given connection probability
    ///
    /// Isolated nodes are then attached to a random other node.
    pub fn random(self, connection_probability: f64) -> Topology {
        let mut topology = Topology::new(self.node_count);
        let mut rng = rand::rng();

        for i in 0..self.node_count {
            for j in (i + 1)..self.node_count {
                if rng.random::<f64>() < connection_probability {
                    topology.add_preset_edge(i, j);
                }
            }
        }

        if self.node_count > 1 {
            for node in 0..self.node_count {
                if topology.neighbors(node).is_none_or(BTreeSet::is_empty) {
                    let mut other = rng.random_range(0..self.node_count - 1);
                    if other >= node {
                        other += 1;
                    }
                    topology.add_preset_edge(node, other);
                }
            }
        }

        topology
    }
}

impl Topology {
    /// Preset edges are in range and loop-free by construction
    fn add_preset_edge(&mut self, a: NodeIndex, b: NodeIndex) {
        if let Err(e) = self.connect(a, b) {
            tracing::error!(error = %e, "invalid preset edge");
        }
    }
}

/// Create a custom topology from an edge list
pub fn from_edges(
    node_count: usize,
    edges: &[(NodeIndex, NodeIndex)],
) -> Result<Topology, TopologyError> {
    let mut topology = Topology::new(node_count);
    for &(a, b) in edges {
        topology.connect(a, b)?;
    }
    Ok(topology)
}

/// Serializable description of a topology, resolved against a node count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "preset", rename_all = "snake_case")]
pub enum TopologySpec {
    /// No connections
    None,
    /// Linear chain i <-> i+1
    #[default]
    Chain,
    Ring,
    Star {
        #[serde(default)]
        center: NodeIndex,
    },
    FullMesh,
    Random {
        probability: f64,
    },
    /// Explicit `(from, to)` pairs
    Edges {
        edges: Vec<(NodeIndex, NodeIndex)>,
    },
}

impl TopologySpec {
    pub fn build(&self, node_count: usize) -> Result<Topology, TopologyError> {
        let builder = TopologyBuilder::new(node_count);
        match self {
            TopologySpec::None => Ok(Topology::new(node_count)),
            TopologySpec::Chain => Ok(builder.chain()),
            TopologySpec::Ring => Ok(builder.ring()),
            TopologySpec::Star { center } => builder.star(*center),
            TopologySpec::FullMesh => Ok(builder.full_mesh()),
            TopologySpec::Random { probability } => Ok(builder.random(*probability)),
            TopologySpec::Edges { edges } => from_edges(node_count, edges),
        }
    }
}

impl FromStr for TopologySpec {
    type Err = TopologyError;

    /// Parse a preset name as used on the command line
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(TopologySpec::None),
            "chain" | "line" => Ok(TopologySpec::Chain),
            "ring" => Ok(TopologySpec::Ring),
            "star" => Ok(TopologySpec::Star { center: 0 }),
            "full" | "full_mesh" => Ok(TopologySpec::FullMesh),
            other => Err(TopologyError::UnknownPreset(other.to_string())),
        }
    }
}

impl fmt::Display for TopologySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologySpec::None => write!(f, "none"),
            TopologySpec::Chain => write!(f, "chain"),
            TopologySpec::Ring => write!(f, "ring"),
            TopologySpec::Star { center } => write!(f, "star(center={center})"),
            TopologySpec::FullMesh => write!(f, "full_mesh"),
            TopologySpec::Random { probability } => write!(f, "random(p={probability})"),
            TopologySpec::Edges { edges } => write!(f, "edges({})", edges.len()),
        }
    }
}
