//! Per-caller sliding-window admission control.
//!
//! Each caller has a window of admission timestamps. A request is admitted
//! when fewer than `max_requests` admissions fall inside the trailing window.
//! Expired timestamps are popped from the front on every call, so the cost
//! of a check is amortized O(1).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tollgate_config::RateLimitSection;
use tracing::warn;

use crate::sweeper::{AbortOnDrop, spawn_periodic};

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum number of requests allowed in the window.
    pub max_requests: u32,
    /// Length of the window.
    pub window: Duration,
}

impl RateLimit {
    /// Create a new rate limit.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// N requests per second.
    #[must_use]
    pub fn per_second(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(1))
    }

    /// N requests per minute.
    #[must_use]
    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }

    /// N requests per hour.
    #[must_use]
    pub fn per_hour(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(3600))
    }

    /// Build from the `[rate_limit]` config section.
    #[must_use]
    pub fn from_section(section: &RateLimitSection) -> Self {
        Self::new(section.max_requests, Duration::from_millis(section.window_ms))
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Admission timestamps for one caller.
#[derive(Debug, Default)]
struct WindowTracker {
    requests: VecDeque<Instant>,
}

impl WindowTracker {
    /// Drop timestamps that have left the window.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.requests.front() {
            if now.duration_since(oldest) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self) -> u32 {
        u32::try_from(self.requests.len()).unwrap_or(u32::MAX)
    }

    /// Time until the oldest admission leaves the window.
    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        self.requests.front().map_or(Duration::ZERO, |&oldest| {
            window.saturating_sub(now.duration_since(oldest))
        })
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed {
        /// Remaining requests in the window after this one.
        remaining: u32,
    },
    /// Request is denied due to rate limiting.
    Denied {
        /// Time until the next request will be admitted.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Check if the request is allowed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Get the retry-after duration if denied.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed { .. } => None,
            Self::Denied { retry_after } => Some(*retry_after),
        }
    }
}

/// Sliding-window rate limiter keyed by caller identity.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    windows: Mutex<HashMap<String, WindowTracker>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimit::default())
    }
}

impl RateLimiter {
    /// Create a limiter applying `limit` to every caller.
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// The applied limit.
    #[must_use]
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, WindowTracker>> {
        self.windows.lock().unwrap_or_else(|e| {
            warn!("Rate limiter lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Check and, if admitted, record a request from `caller`.
    pub fn check(&self, caller: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut windows = self.windows();
        let tracker = windows.entry(caller.to_owned()).or_default();
        tracker.prune(now, self.limit.window);

        if tracker.count() >= self.limit.max_requests {
            return RateLimitResult::Denied {
                retry_after: tracker.retry_after(now, self.limit.window),
            };
        }

        tracker.requests.push_back(now);
        RateLimitResult::Allowed {
            remaining: self.limit.max_requests.saturating_sub(tracker.count()),
        }
    }

    /// Record a request from `caller` if it is within the limit.
    pub fn admit(&self, caller: &str) -> bool {
        self.check(caller).is_allowed()
    }

    /// Requests `caller` could still make in the current window. Does not
    /// record anything.
    #[must_use]
    pub fn remaining(&self, caller: &str) -> u32 {
        let now = Instant::now();
        let windows = self.windows();
        let Some(tracker) = windows.get(caller) else {
            return self.limit.max_requests;
        };
        let live = tracker
            .requests
            .iter()
            .filter(|&&t| now.duration_since(t) < self.limit.window)
            .count();
        self.limit
            .max_requests
            .saturating_sub(u32::try_from(live).unwrap_or(u32::MAX))
    }

    /// Forget callers with no admissions inside the window. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.limit.window;
        let mut windows = self.windows();
        let before = windows.len();
        windows.retain(|_, tracker| {
            tracker.prune(now, window);
            !tracker.requests.is_empty()
        });
        before.saturating_sub(windows.len())
    }

    /// Number of callers currently tracked.
    #[must_use]
    pub fn tracked_callers(&self) -> usize {
        self.windows().len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the guard drops.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> AbortOnDrop {
        let limiter = Arc::clone(self);
        spawn_periodic("rate_limit", interval, move || limiter.sweep())
    }

    /// Clear every window (for testing).
    pub fn reset(&self) {
        self.windows().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_creation() {
        let limit = RateLimit::per_minute(60);
        assert_eq!(limit.max_requests, 60);
        assert_eq!(limit.window, Duration::from_secs(60));

        let limit = RateLimit::per_second(10);
        assert_eq!(limit.window, Duration::from_secs(1));

        let limit = RateLimit::from_section(&RateLimitSection {
            max_requests: 5,
            window_ms: 250,
        });
        assert_eq!(limit, RateLimit::new(5, Duration::from_millis(250)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_then_window_expiry() {
        let limiter = RateLimiter::new(RateLimit::new(3, Duration::from_secs(1)));

        assert_eq!(limiter.check("alice"), RateLimitResult::Allowed { remaining: 2 });
        assert!(limiter.admit("alice"));
        assert!(limiter.admit("alice"));

        let denied = limiter.check("alice");
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(1)));
        assert_eq!(limiter.remaining("alice"), 0);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(limiter.admit("alice"));
        assert_eq!(limiter.remaining("alice"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(RateLimit::new(2, Duration::from_secs(10)));
        assert!(limiter.admit("bob"));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.admit("bob"));
        assert!(!limiter.admit("bob"));

        // First admission leaves the window at t=10; the second stays until t=16.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.admit("bob"));
        let denied = limiter.check("bob");
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_requests_do_not_extend_window() {
        let limiter = RateLimiter::new(RateLimit::new(1, Duration::from_secs(1)));
        assert!(limiter.admit("c"));
        for _ in 0..10 {
            assert!(!limiter.admit("c"));
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.admit("c"));
    }

    #[test]
    fn test_callers_are_independent() {
        let limiter = RateLimiter::new(RateLimit::new(1, Duration::from_secs(60)));
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
        assert_eq!(limiter.remaining("unknown"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_idle_callers() {
        let limiter = RateLimiter::new(RateLimit::new(5, Duration::from_secs(1)));
        limiter.admit("a");
        limiter.admit("b");
        assert_eq!(limiter.tracked_callers(), 2);

        tokio::time::advance(Duration::from_millis(500)).await;
        limiter.admit("b");
        tokio::time::advance(Duration::from_millis(600)).await;

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_callers(), 1);
        assert_eq!(limiter.remaining("b"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let limiter = Arc::new(RateLimiter::new(RateLimit::new(5, Duration::from_secs(1))));
        let guard = limiter.spawn_sweeper(Duration::from_secs(2));
        limiter.admit("a");
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(limiter.tracked_callers(), 0);
        drop(guard);
    }

    #[test]
    fn test_reset() {
        let limiter = RateLimiter::new(RateLimit::new(1, Duration::from_secs(60)));
        assert!(limiter.admit("a"));
        limiter.reset();
        assert!(limiter.admit("a"));
    }
}
