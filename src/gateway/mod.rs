//! Rate-limited gateway in front of the catalog client.
//!
//! Every outbound call goes through [`RateLimitedGateway::call`]: the throttle
//! hands out a slot, the request runs, and failures are classified into
//! [`GatewayError`] after the retry budget is spent.

mod retry_policy;
mod sleeper;
mod throttle;

pub use retry_policy::{is_retryable, RetryPolicy};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
pub use throttle::{IntervalThrottler, NoOpThrottler, RequestThrottler, ThrottleStats};

use crate::catalog::{
    CatalogClient, CatalogError, PageRequest, SearchFilters, SearchPage, TrackDetail,
};
use crate::config::GatewaySettings;
use crate::models::ArtistRecord;
use crate::telemetry::{metrics, GatewayStats};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of a gateway call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The service kept signalling rate limits until the retry budget ran out.
    #[error("{operation}: rate limit still in effect after {attempts} attempts")]
    QuotaExceeded {
        operation: &'static str,
        attempts: u32,
    },

    #[error("{operation}: failed after {attempts} attempts: {source}")]
    TransientFailure {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: CatalogError,
    },

    /// Malformed request or auth failure. Never retried.
    #[error("{operation}: request rejected: {source}")]
    FatalRequestError {
        operation: &'static str,
        #[source]
        source: CatalogError,
    },

    #[error("{operation}: not found: {detail}")]
    NotFound {
        operation: &'static str,
        detail: String,
    },
}

impl GatewayError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::FatalRequestError { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, GatewayError::QuotaExceeded { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound { .. })
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            GatewayError::QuotaExceeded { .. } => "quota_exceeded",
            GatewayError::TransientFailure { .. } => "transient_failure",
            GatewayError::FatalRequestError { .. } => "fatal",
            GatewayError::NotFound { .. } => "not_found",
        }
    }
}

#[derive(Debug, Default)]
struct GatewayCounters {
    requests: AtomicU64,
    retries: AtomicU64,
    rate_limit_hits: AtomicU64,
    throttle_wait_ms: AtomicU64,
    backoff_wait_ms: AtomicU64,
}

pub struct RateLimitedGateway {
    client: Arc<dyn CatalogClient>,
    throttler: Arc<dyn RequestThrottler>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    counters: GatewayCounters,
}

impl RateLimitedGateway {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        throttler: Arc<dyn RequestThrottler>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            throttler,
            sleeper: Arc::new(TokioSleeper),
            policy,
            counters: GatewayCounters::default(),
        }
    }

    pub fn from_settings(client: Arc<dyn CatalogClient>, settings: &GatewaySettings) -> Self {
        Self::new(
            client,
            Arc::new(IntervalThrottler::new(settings.requests_per_second)),
            RetryPolicy::new(settings),
        )
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            requests_issued: self.counters.requests.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            rate_limit_hits: self.counters.rate_limit_hits.load(Ordering::Relaxed),
            throttle_wait_ms: self.counters.throttle_wait_ms.load(Ordering::Relaxed),
            backoff_wait_ms: self.counters.backoff_wait_ms.load(Ordering::Relaxed),
        }
    }

    /// Run `request` under the throttle and retry policy.
    ///
    /// `request` is invoked once per attempt.
    pub async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        mut request: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        let mut retry_count: u32 = 0;
        let mut previous_delay = Duration::ZERO;
        loop {
            let wait = self.throttler.reserve().await;
            if !wait.is_zero() {
                self.counters
                    .throttle_wait_ms
                    .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
                metrics::record_throttle_wait(wait);
                self.sleeper.sleep(wait).await;
            }

            self.counters.requests.fetch_add(1, Ordering::Relaxed);
            let error = match request().await {
                Ok(value) => {
                    metrics::record_gateway_request(operation, "success");
                    return Ok(value);
                }
                Err(error) => error,
            };

            let retry_after = match &error {
                CatalogError::RateLimited { retry_after } => {
                    self.counters.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    *retry_after
                }
                _ => None,
            };

            if !self.policy.should_retry(&error, retry_count) {
                let terminal = self.classify_terminal(operation, retry_count + 1, error);
                metrics::record_gateway_request(operation, terminal.outcome_label());
                return Err(terminal);
            }

            let jitter_sample: f64 = rand::rng().random();
            let delay = self
                .policy
                .delay(retry_count, jitter_sample, retry_after, previous_delay);
            previous_delay = delay;
            let reason = match error {
                CatalogError::RateLimited { .. } => "rate_limited",
                _ => "transient",
            };
            debug!(
                "{} attempt {} failed ({}), backing off {:?}",
                operation,
                retry_count + 1,
                error,
                delay
            );

            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            self.counters
                .backoff_wait_ms
                .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
            metrics::record_retry(operation, reason, delay);
            self.sleeper.sleep(delay).await;
            retry_count += 1;
        }
    }

    fn classify_terminal(
        &self,
        operation: &'static str,
        attempts: u32,
        error: CatalogError,
    ) -> GatewayError {
        match error {
            CatalogError::RateLimited { .. } => {
                warn!("{}: rate limit persisted after {} attempts", operation, attempts);
                GatewayError::QuotaExceeded {
                    operation,
                    attempts,
                }
            }
            CatalogError::NotFound(detail) => GatewayError::NotFound { operation, detail },
            CatalogError::Unauthorized { .. } | CatalogError::BadRequest(_) => {
                GatewayError::FatalRequestError {
                    operation,
                    source: error,
                }
            }
            CatalogError::Server { .. }
            | CatalogError::Network(_)
            | CatalogError::Timeout
            | CatalogError::Parse(_) => {
                warn!("{}: giving up after {} attempts: {}", operation, attempts, error);
                GatewayError::TransientFailure {
                    operation,
                    attempts,
                    source: error,
                }
            }
        }
    }

    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        page: PageRequest,
    ) -> Result<SearchPage, GatewayError> {
        let client = &self.client;
        self.call("search", move || client.search(query, filters, page))
            .await
    }

    pub async fn get_tracks(
        &self,
        ids: &[String],
    ) -> Result<Vec<Option<TrackDetail>>, GatewayError> {
        let client = &self.client;
        self.call("get_tracks", move || client.get_tracks(ids)).await
    }

    pub async fn get_artist(&self, id: &str) -> Result<ArtistRecord, GatewayError> {
        let client = &self.client;
        self.call("get_artist", move || client.get_artist(id)).await
    }
}
