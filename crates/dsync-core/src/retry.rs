//! Retry and backoff for every external call
//!
//! Chain reads, chain writes, signer calls and store accesses all go through
//! [`RetryPolicy::run`]. Each attempt carries its own timeout; errors are
//! classified through [`Classify`], and only [`ErrorClass::Retryable`] errors
//! consume further attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether an error is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: timeouts, resets, throttling, server errors
    Retryable,
    /// Permanent: reverts, authorization failures, bad input
    Fatal,
}

/// Error types that know whether they are transient
pub trait Classify {
    /// Classify this error
    fn class(&self) -> ErrorClass;

    /// Shorthand for `class() == Retryable`
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Error types that can represent an elapsed per-attempt timeout
pub trait TimeoutError {
    /// Error value for an attempt that exceeded `after`
    fn timed_out(after: Duration) -> Self;
}

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay between every attempt
    #[default]
    Fixed,
    /// Linear increase: delay * attempt
    Linear,
    /// Exponential increase: delay * 2^attempt
    Exponential,
    /// Exponential with up to 10% random jitter
    ExponentialWithJitter,
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (zero-based), capped at `max_delay`
    pub fn calculate_delay(
        &self,
        attempt: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Duration {
        use rand::Rng;

        let delay = match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Linear => initial_delay.saturating_mul(attempt + 1),
            BackoffStrategy::Exponential => {
                initial_delay.saturating_mul(2u32.saturating_pow(attempt))
            }
            BackoffStrategy::ExponentialWithJitter => {
                let base = initial_delay.saturating_mul(2u32.saturating_pow(attempt));
                let jitter =
                    (base.as_millis() as f64 * 0.1 * rand::thread_rng().gen::<f64>()) as u64;
                base + Duration::from_millis(jitter)
            }
        };

        delay.min(max_delay)
    }
}

/// Retry policy shared by every external-call boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// How delays grow between attempts
    pub strategy: BackoffStrategy,
    /// Timeout applied to each individual attempt
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3)).with_max_attempts(5)
    }
}

impl RetryPolicy {
    /// Fixed inter-attempt delay
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: 3,
            initial_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            timeout: None,
        }
    }

    /// Exponential backoff starting at 100ms
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            timeout: None,
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::fixed(Duration::ZERO).with_max_attempts(1)
    }

    /// Set total attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the upper bound for delays
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.strategy
            .calculate_delay(attempt, self.initial_delay, self.max_delay)
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `label` names the call in logs. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + TimeoutError + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(E::timed_out(limit)),
                },
                None => operation().await,
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(call = label, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.calculate_delay(attempt - 1);
                    tracing::warn!(
                        call = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::warn!(call = label, attempts = attempt, error = %err, "retries exhausted");
                    } else {
                        tracing::debug!(call = label, attempt, error = %err, "fatal failure, not retrying");
                    }
                    return Err(err);
                }
            }
        }
    }
}
