//! Logging for nodenet binaries and tests
//!
//! `nodenet` logs harness lifecycle events (node starts, connections, sync
//! barriers, teardown) to the console, optionally with a JSONL copy. Each
//! mock node writes its own `debug.log` into its data directory, which the
//! harness keeps on request for post-mortems. `RUST_LOG` overrides the
//! configured level everywhere.
//!
//! ```ignore
//! use nodenet_logging::{LogConfig, NodenetSubscriberBuilder};
//!
//! let _guard = NodenetSubscriberBuilder::new()
//!     .with_config(LogConfig::node(&datadir))
//!     .init()?;
//! ```

pub mod config;
pub mod layers;

use std::path::PathBuf;

pub use config::{ConsoleFormat, LogConfig, NODE_LOG_FILE};
pub use tracing_appender::non_blocking::WorkerGuard;

use thiserror::Error;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::layers::BoxedLayer;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already set: {0}")]
    AlreadySet(String),
}

/// Installs the global subscriber described by a [`LogConfig`]
#[derive(Debug, Default)]
pub struct NodenetSubscriberBuilder {
    config: LogConfig,
}

impl NodenetSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the filter directives (`RUST_LOG` still wins)
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Also append JSONL to `path`
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.file = Some(path.into());
        self
    }

    /// Install the subscriber
    ///
    /// Keep the returned guard alive until exit; dropping it flushes the file.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.level));

        let mut layers: Vec<BoxedLayer<Registry>> = Vec::new();
        layers.extend(layers::console_layer(&self.config));

        let mut guard = None;
        if let Some(path) = &self.config.file {
            let (writer, file_guard) =
                layers::file_writer(path).map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            layers.push(layers::json_layer(writer));
            guard = Some(file_guard);
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()
            .map_err(|e| LoggingError::AlreadySet(e.to_string()))?;
        Ok(guard)
    }
}

/// Send logs to the test runner's capture so they show up only for failing tests
///
/// Call at the top of each test; only the first call in a test binary
/// installs anything.
pub fn init_testing() {
    let _ = NodenetSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let builder = NodenetSubscriberBuilder::new()
            .with_config(LogConfig::verbose())
            .with_level("nodenet_p2p=trace")
            .with_file("run.jsonl");
        assert_eq!(builder.config.level, "nodenet_p2p=trace");
        assert_eq!(builder.config.console, ConsoleFormat::Pretty);
        assert_eq!(builder.config.file, Some(PathBuf::from("run.jsonl")));
    }

    #[test]
    fn test_unwritable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let err = NodenetSubscriberBuilder::new()
            .with_file(blocker.join("run.jsonl"))
            .init()
            .unwrap_err();
        assert!(matches!(err, LoggingError::File { .. }));
    }

    #[test]
    fn test_init_testing_is_repeatable() {
        init_testing();
        init_testing();
    }
}
