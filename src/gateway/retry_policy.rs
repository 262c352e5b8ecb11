//! Retry policy for failed catalog calls.
//!
//! Implements exponential backoff with configurable parameters and bounded
//! jitter.

use crate::catalog::CatalogError;
use crate::config::GatewaySettings;
use std::time::Duration;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries before surfacing a terminal failure.
    pub max_retries: u32,
    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff in milliseconds (cap for exponential growth).
    pub max_backoff_ms: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the base delay.
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(config: &GatewaySettings) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_fraction: config.jitter_fraction,
        }
    }

    /// Policy without jitter, for deterministic delay sequences.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_fraction = 0.0;
        self
    }

    /// Check if an error should be retried given the current retry count.
    pub fn should_retry(&self, error: &CatalogError, retry_count: u32) -> bool {
        is_retryable(error) && retry_count < self.max_retries
    }

    /// Backoff in milliseconds for a given retry count, without jitter.
    ///
    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff_ms`.
    pub fn backoff_ms(&self, retry_count: u32) -> u64 {
        let backoff =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(retry_count as i32);
        backoff.min(self.max_backoff_ms as f64) as u64
    }

    /// Delay before retry number `retry_count`.
    ///
    /// `jitter_sample` must be in `[0, 1)` and scales the full `jitter_fraction`.
    /// The delay never drops below `previous`, the delay of the prior retry of
    /// the same call. A server supplied `retry_after` also acts as a floor.
    /// The result never exceeds the cap.
    pub fn delay(
        &self,
        retry_count: u32,
        jitter_sample: f64,
        retry_after: Option<Duration>,
        previous: Duration,
    ) -> Duration {
        let base =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(retry_count as i32);
        let jitter = self.jitter_fraction.max(0.0);
        let mut delay_ms = base * (1.0 + jitter * jitter_sample.clamp(0.0, 1.0));
        delay_ms = delay_ms.max(previous.as_millis() as f64);
        if let Some(floor) = retry_after {
            delay_ms = delay_ms.max(floor.as_millis() as f64);
        }
        Duration::from_millis(delay_ms.min(self.max_backoff_ms as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&GatewaySettings::default())
    }
}

/// Rate limits, server errors, network errors, timeouts and unparseable
/// responses are retried. Everything else is terminal on the first attempt.
pub fn is_retryable(error: &CatalogError) -> bool {
    matches!(
        error,
        CatalogError::RateLimited { .. }
            | CatalogError::Server { .. }
            | CatalogError::Network(_)
            | CatalogError::Timeout
            | CatalogError::Parse(_)
    )
}
