//! Logging settings
//!
//! A run file's `[log]` table deserializes into [`LogConfig`]:
//!
//! ```toml
//! [log]
//! level = "nodenet_harness=debug,info"
//! console = "pretty"
//! file = "target/nodenet/run.jsonl"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the log a node process keeps in its data directory
pub const NODE_LOG_FILE: &str = "debug.log";

/// How events are rendered on the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines
    Pretty,
    /// No console output
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is unset
    pub level: String,
    pub console: ConsoleFormat,
    /// Colour pretty console output
    pub ansi: bool,
    /// JSONL copy of every event, appended to across runs
    pub file: Option<PathBuf>,
    /// Route console output through the test runner's capture
    #[serde(skip)]
    pub captured: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleFormat::Json,
            ansi: false,
            file: None,
            captured: false,
        }
    }
}

impl LogConfig {
    /// Readable debug output for a person watching a run
    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Pretty,
            ansi: true,
            ..Default::default()
        }
    }

    /// Log of a node process: JSONL in `<data_dir>/debug.log`, nothing on the console
    ///
    /// The supervisor already sends the process's stdout and stderr to files
    /// beside it, so console output would only duplicate the log. A restarted
    /// node keeps appending to the same file.
    pub fn node(data_dir: &Path) -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Off,
            file: Some(data_dir.join(NODE_LOG_FILE)),
            ..Default::default()
        }
    }

    /// Harness lifecycle at info, everything else at warn, shown only for failing tests
    pub fn testing() -> Self {
        Self {
            level: "warn,nodenet_harness=info,nodenet_node=info".to_string(),
            console: ConsoleFormat::Pretty,
            captured: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_json_console_only() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.console, ConsoleFormat::Json);
        assert!(config.file.is_none());
        assert!(!config.captured);
    }

    #[test]
    fn test_node_log_lives_in_data_dir() {
        let config = LogConfig::node(Path::new("/tmp/run/node3"));
        assert_eq!(config.console, ConsoleFormat::Off);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/run/node3/debug.log")));
    }

    #[test]
    fn test_testing_preset_is_captured() {
        let config = LogConfig::testing();
        assert!(config.captured);
        assert!(!config.ansi);
        assert!(config.level.contains("nodenet_harness=info"));
    }

    #[test]
    fn test_log_table() {
        let config: LogConfig = toml::from_str(
            r#"
            console = "pretty"
            file = "target/nodenet/run.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.level, "info");
        assert_eq!(config.console, ConsoleFormat::Pretty);
        assert_eq!(config.file, Some(PathBuf::from("target/nodenet/run.jsonl")));
        assert!(!config.captured);

        let off: LogConfig = toml::from_str(r#"console = "off""#).unwrap();
        assert_eq!(off.console, ConsoleFormat::Off);
        assert!(toml::from_str::<LogConfig>(r#"console = "loud""#).is_err());
    }
}
