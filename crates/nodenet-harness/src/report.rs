//! Aggregate pass/fail reporting

use std::collections::BTreeSet;
use std::fmt;

use nodenet_core::NodeIndex;
use nodenet_node::{NodeError, NodeErrorKind};
use serde::Serialize;

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Spawn,
    StartupTimeout,
    ProcessExited,
    Connect,
    Rpc,
    SyncTimeout,
    UngracefulShutdown,
    /// The test body failed
    Test,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Spawn => "spawn",
            FailureKind::StartupTimeout => "startup timeout",
            FailureKind::ProcessExited => "process exited",
            FailureKind::Connect => "connect",
            FailureKind::Rpc => "rpc",
            FailureKind::SyncTimeout => "sync timeout",
            FailureKind::UngracefulShutdown => "ungraceful shutdown",
            FailureKind::Test => "test",
        };
        f.write_str(name)
    }
}

impl From<NodeErrorKind> for FailureKind {
    fn from(kind: NodeErrorKind) -> Self {
        match kind {
            NodeErrorKind::Spawn => FailureKind::Spawn,
            NodeErrorKind::StartupTimeout => FailureKind::StartupTimeout,
            NodeErrorKind::ProcessExited => FailureKind::ProcessExited,
            NodeErrorKind::UngracefulShutdown => FailureKind::UngracefulShutdown,
            NodeErrorKind::Rpc => FailureKind::Rpc,
            NodeErrorKind::Connect => FailureKind::Connect,
            NodeErrorKind::InvalidState | NodeErrorKind::Io => FailureKind::Test,
        }
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Node responsible, if the failure belongs to one
    pub node: Option<NodeIndex>,
    pub kind: FailureKind,
    /// Harness operation in progress when it happened
    pub operation: String,
    pub message: String,
}

impl Failure {
    pub fn new(
        node: Option<NodeIndex>,
        kind: FailureKind,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node,
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn from_node_error(operation: impl Into<String>, error: &NodeError) -> Self {
        Self::new(
            Some(error.node()),
            error.kind().into(),
            operation,
            error.to_string(),
        )
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "[node{node}] ")?,
            None => write!(f, "[harness] ")?,
        }
        write!(f, "{} during {}: {}", self.kind, self.operation, self.message)
    }
}

/// Outcome of a harness run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarnessReport {
    failures: Vec<Failure>,
}

impl HarnessReport {
    pub fn new(failures: Vec<Failure>) -> Self {
        Self { failures }
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn push(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    /// Indices of the nodes named by any failure
    pub fn failed_nodes(&self) -> BTreeSet<NodeIndex> {
        self.failures.iter().filter_map(|f| f.node).collect()
    }

    /// Whether a failure of `kind` was recorded for `node`
    pub fn has_failure(&self, node: Option<NodeIndex>, kind: FailureKind) -> bool {
        self.failures
            .iter()
            .any(|f| f.node == node && f.kind == kind)
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return write!(f, "PASSED");
        }
        write!(f, "FAILED ({} failure", self.failures.len())?;
        if self.failures.len() != 1 {
            write!(f, "s")?;
        }
        write!(f, ")")?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_report_passes() {
        let report = HarnessReport::default();
        assert!(report.passed());
        assert_eq!(report.to_string(), "PASSED");
    }

    #[test]
    fn test_report_from_node_error() {
        let error = NodeError::StartupTimeout {
            node: 1,
            timeout: Duration::from_secs(2),
            last_error: "connection refused".into(),
        };
        let report = HarnessReport::new(vec![Failure::from_node_error("setup", &error)]);

        assert!(!report.passed());
        assert!(report.has_failure(Some(1), FailureKind::StartupTimeout));
        assert_eq!(report.failed_nodes().into_iter().collect::<Vec<_>>(), vec![1]);

        let text = report.to_string();
        assert!(text.starts_with("FAILED (1 failure)"));
        assert!(text.contains("[node1] startup timeout during setup"));
    }

    #[test]
    fn test_harness_level_failure() {
        let mut report = HarnessReport::default();
        report.push(Failure::new(None, FailureKind::Test, "test", "assertion failed"));
        report.push(Failure::new(Some(0), FailureKind::SyncTimeout, "sync", "diverged"));

        assert_eq!(report.failed_nodes().len(), 1);
        assert!(report.to_string().contains("[harness] test during test: assertion failed"));
        assert!(report.to_string().starts_with("FAILED (2 failures)"));
    }
}
