// src/retry/strategy.rs

use crate::config::RetryConfig;
use crate::error::RoutingError;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total dispatch attempts allowed for one request, the first included.
    pub fn max_attempts(&self) -> u32 {
        if self.config.enabled {
            1 + self.config.max_retries
        } else {
            1
        }
    }

    /// Whether a failed attempt should be tried again on another backend.
    pub fn decide(&self, error: &RoutingError, attempt: u32) -> RetryDecision {
        if !error.is_upstream_failure() {
            return RetryDecision::NoRetry;
        }
        if attempt + 1 >= self.max_attempts() {
            return RetryDecision::NoRetry;
        }
        RetryDecision::Retry
    }

    /// Waits out the backoff before retry number `attempt` (1-based).
    pub async fn pause(&self, attempt: u32) {
        let backoff = self.calculate_backoff(attempt);
        if !backoff.is_zero() {
            debug!(attempt, ?backoff, "Backing off before retry");
            sleep(backoff).await;
        }
    }

    /// Exponential backoff with up to 25% jitter, capped at the configured maximum.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base().as_millis() as u64;
        let max = self.config.backoff_max().as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }

        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(max);
        let jitter = (capped as f64 * rand::random::<f64>() * 0.25) as u64;

        Duration::from_millis(capped + jitter)
    }
}
