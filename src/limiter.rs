//! Shared pacing for concurrent transfers.
//!
//! With a single worker, the migrator simply sleeps between transfers.
//! With several workers, per-worker sleeps would multiply the request rate
//! by the worker count, so every worker instead reserves a start slot from
//! one [`RateLimiter`]. Slots are handed out `interval` apart, which caps
//! the pool at `1 / interval` transfer starts per second regardless of how
//! many workers are waiting.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Longest spacing honoured between permits (about 30 years).
const MAX_INTERVAL: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A next-slot rate limiter shared by all workers of a run.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// One permit every `interval`. A zero interval never waits.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.min(MAX_INTERVAL),
            next_slot: Mutex::new(None),
        }
    }

    /// Limiter admitting `rate` permits per second.
    pub fn per_second(rate: f64) -> Self {
        let interval = if rate.is_finite() && rate > 0.0 {
            Duration::try_from_secs_f64(1.0 / rate).unwrap_or(MAX_INTERVAL)
        } else {
            Duration::ZERO
        };
        Self::new(interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Claim the earliest free slot and return when it starts.
    fn reserve(&self) -> Instant {
        let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let slot = match *next {
            Some(n) if n > now => n,
            _ => now,
        };
        *next = Some(slot.checked_add(self.interval).unwrap_or(slot));
        slot
    }

    /// Wait for a permit.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        sleep_until(self.reserve()).await;
    }

    /// Wait for a permit unless `cancel` fires first.
    ///
    /// Returns `false` if cancelled. The reserved slot is not returned to
    /// the pool; a cancelled run does not need it.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if self.interval.is_zero() {
            return true;
        }
        let slot = self.reserve();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep_until(slot) => true,
        }
    }
}
