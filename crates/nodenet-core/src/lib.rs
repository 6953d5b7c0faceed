//! # Nodenet Core
//!
//! Primitives shared by every nodenet crate:
//!
//! - [`TimeoutConfig`]: the timeouts bounding every blocking wait in the harness
//! - [`wait_until`] / [`wait_until_async`]: deadline-driven polling helpers
//! - [`WaitTimeout`]: the error every expired wait reports

pub mod error;
pub mod timeouts;
pub mod wait;

pub use error::WaitTimeout;
pub use timeouts::TimeoutConfig;
pub use wait::{wait_until, wait_until_async};

/// Index of a node inside a harness-managed network
pub type NodeIndex = usize;
