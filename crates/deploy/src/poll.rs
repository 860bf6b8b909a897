//! Fixed-interval waiting for long-running cloud operations.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

use crate::error::PollTimeout;

/// Interval between poll attempts for every long-running operation.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of a single poll attempt.
pub enum Poll<T> {
    /// The operation is still running; keep waiting.
    Pending,
    /// The operation reached a successful terminal state.
    Ready(T),
}

/// Drive a long-running operation to completion.
///
/// Calls `poll` once per `interval` tick until it reports [`Poll::Ready`] or
/// fails, or until `deadline` passes, whichever comes first. The first attempt
/// happens one full interval after the wait begins (the operation was
/// submitted just before). Deadline expiry interrupts both the sleep and an
/// in-flight attempt, and is reported as [`PollTimeout`] so callers can tell a
/// cancelled wait from a remote failure.
pub async fn wait_for<T, F, Fut>(
    operation: &str,
    interval: Duration,
    deadline: Instant,
    mut poll: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>>>,
{
    let wait = async {
        loop {
            tokio::time::sleep(interval).await;
            match poll().await? {
                Poll::Pending => {}
                Poll::Ready(value) => return Ok(value),
            }
        }
    };

    match tokio::time::timeout_at(deadline, wait).await {
        Ok(result) => result,
        Err(_) => Err(PollTimeout {
            operation: operation.to_string(),
        }
        .into()),
    }
}
