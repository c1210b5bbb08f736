//! Poll-until-condition helpers: retry a predicate on a short fixed
//! interval, bounded by an overall timeout, rather than asserting on the
//! first read.
//!
//! Useful wherever a test needs to observe the effect of a background task
//! (the health loop, an async release) without a direct synchronization
//! point to await.

use std::time::Duration;

/// Polls `condition` every `interval` until it returns `true` or `timeout`
/// elapses, in which case this returns an error.
pub async fn wait_until<F>(timeout: Duration, interval: Duration, mut condition: F) -> eyre::Result<()>
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    })
    .await
    .map_err(|_| eyre::eyre!("condition not met within {timeout:?}"))
}

/// [`wait_until`] with the crate's default timeout and a 10ms poll interval,
/// suited to in-memory fakes where the condition should flip almost
/// immediately.
pub async fn wait_until_default<F>(condition: F) -> eyre::Result<()>
where
    F: FnMut() -> bool,
{
    wait_until(crate::TEST_TIMEOUT, Duration::from_millis(10), condition).await
}
