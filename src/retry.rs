//! Bounded retry with backoff, shared by page extraction and notification delivery.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::utils::fmt_duration;

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `attempt × base`, where `attempt` counts from 1.
    Linear(Duration),
    Constant(Duration),
}

impl Backoff {
    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Linear(base) => base.saturating_mul(attempt),
            Self::Constant(base) => base,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear(base),
        }
    }

    /// Run `op` until it succeeds or attempts are exhausted, returning the last error.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts => {
                    let wait = self.backoff.delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        retry_in = fmt_duration(wait),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(operation, attempt, max_attempts, error = %e, "All attempts failed");
                    return Err(e);
                }
            }
        }
    }
}
