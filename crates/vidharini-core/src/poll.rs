//! Bounded fixed-interval polling shared by the task poller and the
//! speech-to-text provider client.

use std::future::Future;
use std::time::Duration;

use crate::error::VidharaError;

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Outcome of one poll attempt.
#[derive(Debug)]
pub enum PollStep<T> {
    Pending,
    Done(T),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// Log the error and try again on the next tick.
    Retry,
    /// Return the error immediately.
    Abort,
}

pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    on_error: OnError,
    mut check: F,
) -> Result<T, VidharaError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStep<T>, VidharaError>>,
{
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await {
            Ok(PollStep::Done(value)) => return Ok(value),
            Ok(PollStep::Failed(reason)) => return Err(VidharaError::TaskFailed(reason)),
            Ok(PollStep::Pending) => {}
            Err(e) if on_error == OnError::Retry => {
                tracing::debug!(attempt, error = %e, "poll attempt failed, retrying");
            }
            Err(e) => return Err(e),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(VidharaError::Timeout(policy.max_attempts))
}
