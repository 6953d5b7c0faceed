//! Per-connection receipt bookkeeping
//!
//! The receive task is the only writer. Test code reads through
//! [`MessageLog::with`], which holds the lock for the duration of the closure
//! so a count and its last-message slot are always observed together.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use nodenet_wire::Message;
use parking_lot::Mutex;

/// Receipt state for one command
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Number of messages received with this command
    pub count: u64,
    /// Most recent message received with this command
    pub last: Message,
}

/// Locked view of a connection's receipt state
#[derive(Debug, Default)]
pub struct LogView {
    entries: HashMap<String, LogEntry>,
    total: u64,
}

impl LogView {
    /// Number of messages received with `command` (0 if none)
    pub fn count(&self, command: &str) -> u64 {
        self.entries.get(command).map_or(0, |e| e.count)
    }

    /// Most recent message received with `command`
    pub fn last(&self, command: &str) -> Option<&Message> {
        self.entries.get(command).map(|e| &e.last)
    }

    /// Total messages received over all commands
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Commands received at least once
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entry(&self, command: &str) -> Option<&LogEntry> {
        self.entries.get(command)
    }
}

/// Shared handle to a connection's receipt state
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    inner: Arc<Mutex<LogView>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one received message; count and slot change under one lock
    pub(crate) fn record(&self, message: &Message) {
        let mut view = self.inner.lock();
        view.total += 1;
        match view.entries.get_mut(message.command()) {
            Some(entry) => {
                entry.count += 1;
                entry.last = message.clone();
            }
            None => {
                view.entries.insert(
                    message.command().to_string(),
                    LogEntry {
                        count: 1,
                        last: message.clone(),
                    },
                );
            }
        }
    }

    /// Run `f` against a consistent view of the log
    pub fn with<R>(&self, f: impl FnOnce(&LogView) -> R) -> R {
        f(&self.inner.lock())
    }

    pub fn count(&self, command: &str) -> u64 {
        self.with(|view| view.count(command))
    }

    pub fn last(&self, command: &str) -> Option<Message> {
        self.with(|view| view.last(command).cloned())
    }

    pub fn total(&self) -> u64 {
        self.with(LogView::total)
    }

    /// Snapshot of every command's count
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.with(|view| {
            view.entries
                .iter()
                .map(|(command, entry)| (command.clone(), entry.count))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = MessageLog::new();
        assert_eq!(log.count("ping"), 0);
        assert!(log.last("ping").is_none());
        assert_eq!(log.total(), 0);
    }

    #[test]
    fn test_record_updates_count_and_last() {
        let log = MessageLog::new();
        log.record(&Message::Ping(1));
        log.record(&Message::Ping(2));
        log.record(&Message::Verack);

        assert_eq!(log.count("ping"), 2);
        assert_eq!(log.last("ping"), Some(Message::Ping(2)));
        assert_eq!(log.count("verack"), 1);
        assert_eq!(log.total(), 3);

        let counts = log.counts();
        assert_eq!(counts.get("ping"), Some(&2));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_unknown_commands_are_logged_by_name() {
        let log = MessageLog::new();
        log.record(&Message::Unknown {
            command: "wtxidrelay".into(),
            payload: Default::default(),
        });
        assert_eq!(log.count("wtxidrelay"), 1);
        log.with(|view| {
            assert_eq!(view.commands().collect::<Vec<_>>(), vec!["wtxidrelay"]);
        });
    }

    #[test]
    fn test_clones_share_state() {
        let log = MessageLog::new();
        let reader = log.clone();
        log.record(&Message::Pong(9));
        assert_eq!(reader.count("pong"), 1);
    }
}
