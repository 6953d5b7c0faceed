//! Error types shared across nodenet crates

use std::time::Duration;

use thiserror::Error;

/// A bounded wait expired before its condition held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("condition not met within {timeout:?}")]
pub struct WaitTimeout {
    /// The timeout that elapsed
    pub timeout: Duration,
}
