//! Bounded retry with cancellable, pluggable backoff.
//!
//! Every component that touches the network or a store goes through [`retry`] or
//! [`retry_notify`]. Invocations share no state: a [`RetryPolicy`] is a plain value.

use crate::error::{Result, SnifferError};
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;

/// How the delay between two attempts is derived from the attempt number (1-based).
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// Always wait `base_delay`.
    Fixed,
    /// Wait `attempt * step`.
    Linear(Duration),
    /// Wait `base_delay * 2^(attempt - 1)`, capped at `max`.
    Exponential { max: Duration },
    /// Caller-supplied schedule.
    Custom(fn(u32) -> Duration),
}

/// An immutable description of how often and how patiently to retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff,
        }
    }

    /// Opening the store: 3 attempts, waiting `attempt * 2s`.
    pub const fn database() -> Self {
        Self::new(3, Duration::from_secs(2), Backoff::Linear(Duration::from_secs(2)))
    }

    /// Dialing the streaming endpoint: 10 attempts, waiting `attempt * 500ms`.
    pub const fn websocket() -> Self {
        Self::new(10, Duration::from_secs(1), Backoff::Linear(Duration::from_millis(500)))
    }

    /// Fetching one historical block: 3 attempts, doubling from 2s.
    pub const fn backfill_block() -> Self {
        Self::new(
            3,
            Duration::from_secs(2),
            Backoff::Exponential {
                max: Duration::from_secs(30),
            },
        )
    }

    /// Subscribing a freshly built coordinator: 3 attempts, doubling from 2s.
    pub const fn coordinator_start() -> Self {
        Self::new(
            3,
            Duration::from_secs(2),
            Backoff::Exponential {
                max: Duration::from_secs(30),
            },
        )
    }

    /// Resolving a live signature the RPC node has not indexed yet.
    pub const fn transaction_lookup() -> Self {
        Self::new(3, Duration::from_millis(500), Backoff::Linear(Duration::from_millis(500)))
    }

    /// Returns the wait that follows the given failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Exponential { max } => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor).min(max)
            }
            Backoff::Custom(schedule) => schedule(attempt),
        }
    }
}

/// Runs `operation` until it succeeds or the policy's attempts are used up.
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_notify(cancel, policy, operation, |_, _| {}).await
}

/// Like [`retry`], calling `notify(attempt, &error)` after every failed attempt.
///
/// A zero `max_attempts` still runs the operation once. No sleep follows the final
/// attempt. Cancellation during a sleep returns [`SnifferError::Cancelled`] right
/// away; an operation that itself reports cancellation is not retried.
pub async fn retry_notify<T, F, Fut, N>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut operation: F,
    mut notify: N,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(u32, &SnifferError),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => err,
        };

        notify(attempt, &err);

        if attempt >= max_attempts {
            return Err(SnifferError::RetryExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = policy.delay_for(attempt);
        tokio::select! {
            _ = cancel.cancelled() => return Err(SnifferError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
