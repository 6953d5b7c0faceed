//! Deadline-driven polling
//!
//! Every sync barrier in the harness is a predicate re-evaluated on a fixed
//! interval until it holds or a deadline passes. Predicates must take any
//! locks they need themselves and release them before returning.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::trace;

use crate::error::WaitTimeout;

/// Poll `predicate` every `poll_interval` until it returns true or `timeout` elapses
///
/// The predicate is always evaluated at least once, and once more at the deadline.
pub async fn wait_until<F>(
    mut predicate: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), WaitTimeout>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            trace!(?timeout, "wait_until expired");
            return Err(WaitTimeout { timeout });
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Like [`wait_until`], for predicates that must await (e.g. RPC calls)
pub async fn wait_until_async<F, Fut>(
    mut predicate: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().await {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            trace!(?timeout, "wait_until_async expired");
            return Err(WaitTimeout { timeout });
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}
