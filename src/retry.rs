//! Per-call timeout and retry at the tool/backend call boundary.
//!
//! Every external call goes through [`run_with_policy`]: each attempt is
//! bounded by `call_timeout`, and failures the error type classifies as
//! retryable are retried up to `retry_attempts` more times with exponential
//! backoff.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Timeout and retry policy for one kind of call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// Retries after the first attempt
    pub retry_attempts: u32,
    /// Upper bound on one attempt
    #[serde(with = "crate::util::duration_millis")]
    pub call_timeout: Duration,
    /// First backoff delay; doubles per retry
    #[serde(with = "crate::util::duration_millis")]
    pub backoff_base: Duration,
    /// Backoff ceiling
    #[serde(with = "crate::util::duration_millis")]
    pub backoff_max: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            retry_attempts: 2,
            call_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl CallPolicy {
    /// Delay before retry number `attempt` (0-based).
    ///
    /// # Formula
    /// `min(backoff_base * 2^attempt, backoff_max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }
}

/// Errors that know whether retrying can help.
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;

    /// Error reported when an attempt exceeds the call timeout.
    fn timed_out(after: Duration) -> Self;

    /// Delay before the next attempt. Defaults to the policy's backoff.
    fn retry_delay(&self, attempt: u32, policy: &CallPolicy) -> Duration {
        policy.backoff(attempt)
    }
}

/// Result of a policy-governed call.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, at least 1
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Run `op` under `policy`.
///
/// `op` receives the 0-based attempt number.
pub async fn run_with_policy<T, E, F, Fut>(policy: &CallPolicy, label: &str, mut op: F) -> Attempted<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts();
    let mut attempt = 0u32;

    loop {
        let result = match tokio::time::timeout(policy.call_timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.call_timeout)),
        };
        attempt += 1;

        match result {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                }
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = err.retry_delay(attempt - 1, policy);
                tracing::warn!(
                    call = %label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                }
            }
        }
    }
}
