//! Sliding-window admission control for outbound validation and test calls.
//!
//! Admissions are counted over a trailing time window, so a burst can pass
//! at a window boundary. State is in memory only and resets on restart.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Thread-safe sliding-window rate limiter.
///
/// # Example
/// ```rust
/// use dbvault_core::RateLimiter;
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new(2, Duration::from_secs(60));
/// assert!(limiter.allow());
/// assert!(limiter.allow());
/// assert!(!limiter.allow());
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_requests` calls per `window`.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Creates a limiter from validated settings.
    pub fn from_config(config: &RateLimitConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self::new(config.max_requests, config.window()))
    }

    /// Admits or denies a call made now.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Admits or denies a call made at `now`.
    ///
    /// Timestamps older than the window are pruned first; the call is
    /// recorded only when admitted.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut timestamps = self.lock();
        Self::prune(&mut timestamps, now, self.window);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            true
        } else {
            debug!(
                "Rate limit reached: {} calls within {:?}",
                timestamps.len(),
                self.window
            );
            false
        }
    }

    /// Calls still admissible in the current window.
    pub fn remaining(&self) -> usize {
        let mut timestamps = self.lock();
        Self::prune(&mut timestamps, Instant::now(), self.window);
        self.max_requests.saturating_sub(timestamps.len())
    }

    /// Forgets every recorded call.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Configured maximum per window.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        // A panic while holding the lock cannot leave the deque inconsistent.
        self.timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = timestamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
