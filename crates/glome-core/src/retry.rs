//! Retry mechanisms for handling transient failures

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts; `None` retries until success
    pub max_attempts: Option<u32>,
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Jitter factor to randomize delays
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Unbounded retries with short, capped backoff.
    ///
    /// Gossip must eventually land once the peer is reachable again, so there
    /// is no attempt limit; the cap keeps a healed peer from waiting long.
    pub fn gossip() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == Some(0) {
            return Err(Error::config("retry.max_attempts must be at least 1"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::config("retry.backoff_multiplier must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(Error::config("retry.jitter_factor must be within [0, 1]"));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::config(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_delay(self, attempt)
    }
}

/// Retry statistics
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Total number of attempts made
    pub total_attempts: u32,
    /// Attempts that failed
    pub failed_attempts: u32,
    /// Total time spent, including delays
    pub total_retry_time: Duration,
}

/// Retry context for tracking retry attempts
#[derive(Debug)]
pub struct RetryContext {
    config: RetryConfig,
    stats: RetryStats,
    start_time: Instant,
}

impl RetryContext {
    /// Create a new retry context
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: RetryStats::default(),
            start_time: Instant::now(),
        }
    }

    /// Get current retry statistics
    pub fn stats(&self) -> RetryStats {
        let mut stats = self.stats.clone();
        stats.total_retry_time = self.start_time.elapsed();
        stats
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or `cancel` fires.
    ///
    /// Cancellation is observed between attempts and during delays; it
    /// yields [`Error::Shutdown`].
    pub async fn run<F, Fut, T>(&mut self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Shutdown);
            }

            self.stats.total_attempts += 1;
            let attempt = self.stats.total_attempts;

            let error = tokio::select! {
                result = operation() => match result {
                    Ok(result) => return Ok(result),
                    Err(error) => error,
                },
                _ = cancel.cancelled() => return Err(Error::Shutdown),
            };
            self.stats.failed_attempts += 1;

            if !error.is_retryable() {
                return Err(error);
            }
            if self.config.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(error);
            }

            let delay = calculate_delay(&self.config, attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Shutdown),
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
    }
}

/// Calculate delay with exponential backoff and jitter
fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let initial = Duration::from_millis(config.initial_delay_ms).as_nanos() as f64;
    let max = Duration::from_millis(config.max_delay_ms).as_nanos() as f64;

    // Calculate base delay with exponential backoff
    let exponent = attempt.saturating_sub(1).min(63) as i32;
    let base_delay = initial * config.backoff_multiplier.powi(exponent);

    // Apply maximum delay limit
    let base_delay = base_delay.min(max);

    // Add jitter to prevent thundering herd
    let jitter_range = base_delay * config.jitter_factor;
    let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;

    let final_delay = (base_delay + jitter).clamp(0.0, max) as u64;

    Duration::from_nanos(final_delay)
}
