//! Request-rate throttling for catalog calls.
//!
//! Every call site reserves a slot before talking to the remote service; the
//! throttle state is shared by all concurrent callers.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Trait for request-rate throttling.
#[async_trait]
pub trait RequestThrottler: Send + Sync {
    /// Reserve the next request slot. Returns how long the caller must wait
    /// before issuing the request.
    async fn reserve(&self) -> Duration;

    /// Reset state (for testing or manual override).
    async fn reset(&self);

    /// Get current usage stats for monitoring.
    async fn get_stats(&self) -> ThrottleStats;
}

/// Current throttle statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThrottleStats {
    /// Slots handed out so far
    pub reservations: u64,
    /// Sum of all waits handed out
    pub total_wait: Duration,
    /// Configured ceiling
    pub requests_per_second: f64,
}

#[derive(Debug)]
struct IntervalState {
    next_slot: Option<Instant>,
    reservations: u64,
    total_wait: Duration,
}

/// Fixed-interval throttler.
///
/// Requests are spaced at least `1 / requests_per_second` apart. Slots are
/// handed out in reservation order, so concurrent callers queue up instead of
/// bursting.
pub struct IntervalThrottler {
    state: Mutex<IntervalState>,
    interval: Duration,
    requests_per_second: f64,
}

impl IntervalThrottler {
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            state: Mutex::new(IntervalState {
                next_slot: None,
                reservations: 0,
                total_wait: Duration::ZERO,
            }),
            interval,
            requests_per_second,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl RequestThrottler for IntervalThrottler {
    async fn reserve(&self) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let slot = match state.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        state.next_slot = Some(slot + self.interval);
        state.reservations += 1;

        let wait = slot.saturating_duration_since(now);
        state.total_wait += wait;
        wait
    }

    async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.next_slot = None;
        state.reservations = 0;
        state.total_wait = Duration::ZERO;
    }

    async fn get_stats(&self) -> ThrottleStats {
        let state = self.state.lock().await;
        ThrottleStats {
            reservations: state.reservations,
            total_wait: state.total_wait,
            requests_per_second: self.requests_per_second,
        }
    }
}

/// No-op throttler that never delays.
pub struct NoOpThrottler;

#[async_trait]
impl RequestThrottler for NoOpThrottler {
    async fn reserve(&self) -> Duration {
        Duration::ZERO
    }

    async fn reset(&self) {}

    async fn get_stats(&self) -> ThrottleStats {
        ThrottleStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_reservation_is_immediate() {
        let throttler = IntervalThrottler::new(10.0);
        assert_eq!(throttler.reserve().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_back_to_back_reservations_are_spaced() {
        let throttler = IntervalThrottler::new(10.0);
        assert_eq!(throttler.interval(), Duration::from_millis(100));

        throttler.reserve().await;
        let second = throttler.reserve().await;
        let third = throttler.reserve().await;

        // Second slot is ~100ms out, third ~200ms out
        assert!(second > Duration::from_millis(50));
        assert!(second <= Duration::from_millis(100));
        assert!(third > Duration::from_millis(150));
        assert!(third <= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_distinct_slots() {
        let throttler = Arc::new(IntervalThrottler::new(100.0));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let t = throttler.clone();
            handles.push(tokio::spawn(async move { t.reserve().await }));
        }
        let mut waits = Vec::new();
        for handle in handles {
            waits.push(handle.await.unwrap());
        }
        waits.sort();

        // 20 slots at 10ms spacing: the latest is at least 150ms out
        assert!(waits[19] >= Duration::from_millis(150));
        let stats = throttler.get_stats().await;
        assert_eq!(stats.reservations, 20);
    }

    #[tokio::test]
    async fn test_reset() {
        let throttler = IntervalThrottler::new(1.0);
        throttler.reserve().await;
        assert!(throttler.reserve().await > Duration::ZERO);

        throttler.reset().await;

        assert_eq!(throttler.reserve().await, Duration::ZERO);
        assert_eq!(throttler.get_stats().await.reservations, 1);
    }

    #[tokio::test]
    async fn test_noop_throttler() {
        let throttler = NoOpThrottler;
        for _ in 0..100 {
            assert_eq!(throttler.reserve().await, Duration::ZERO);
        }
        assert_eq!(throttler.get_stats().await, ThrottleStats::default());
    }
}
