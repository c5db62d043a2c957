//! Per-category request throttling.
//!
//! Every [`ServiceCategory`] owns one "earliest next request" instant. A
//! dispatch waits for that instant and then pushes it forward by the
//! category's interval; a 429 response pushes it further out. Categories
//! never wait on each other.

use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::category::ServiceCategory;

/// Stand-in deadline offset when `now + interval` does not fit an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(now: Instant, interval: Duration) -> Instant {
    now.checked_add(interval)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

struct CategoryClock {
    interval: Duration,
    next: Mutex<Instant>,
}

/// Per-category throttle clocks.
pub struct RateLimiter {
    clocks: FxHashMap<ServiceCategory, CategoryClock>,
}

impl RateLimiter {
    /// Create a limiter. Categories missing from `intervals` use their
    /// default interval.
    pub fn new(intervals: &FxHashMap<ServiceCategory, Duration>) -> Self {
        let now = Instant::now();
        let clocks = ServiceCategory::ALL
            .into_iter()
            .map(|category| {
                let interval = intervals
                    .get(&category)
                    .copied()
                    .unwrap_or_else(|| category.default_interval());
                let clock = CategoryClock {
                    interval,
                    next: Mutex::new(now),
                };
                (category, clock)
            })
            .collect();
        Self { clocks }
    }

    /// Configured minimum spacing for `category`.
    pub fn interval(&self, category: ServiceCategory) -> Duration {
        self.clock(category).interval
    }

    /// Instant at or after which the next request to `category` may go out.
    pub fn deadline(&self, category: ServiceCategory) -> Instant {
        *self.lock(category)
    }

    /// Suspend until the throttle deadline of `category` has passed.
    pub async fn wait(&self, category: ServiceCategory) {
        loop {
            let deadline = self.deadline(category);
            if Instant::now() >= deadline {
                return;
            }
            debug!(
                "`{category}` is throttled, sleeping for {:?}",
                deadline - Instant::now()
            );
            sleep_until(deadline).await;
        }
    }

    /// Record a dispatch: the next request may go out `interval` from now.
    pub fn mark(&self, category: ServiceCategory, interval: Duration) {
        *self.lock(category) = deadline_after(Instant::now(), interval);
    }

    /// Wait for the deadline and mark the dispatch in one step.
    ///
    /// The check and the update happen under the category lock, so callers
    /// that wake together still go out one interval apart.
    pub async fn acquire(&self, category: ServiceCategory) {
        let interval = self.interval(category);
        loop {
            let deadline = {
                let mut next = self.lock(category);
                let now = Instant::now();
                if now >= *next {
                    *next = deadline_after(now, interval);
                    return;
                }
                *next
            };
            debug!(
                "`{category}` is throttled, sleeping for {:?}",
                deadline - Instant::now()
            );
            sleep_until(deadline).await;
        }
    }

    /// Push the deadline to `now + reset` unless it is already later.
    ///
    /// Returns the resulting deadline.
    pub fn raise(&self, category: ServiceCategory, reset: Duration) -> Instant {
        let mut next = self.lock(category);
        let candidate = deadline_after(Instant::now(), reset);
        if candidate > *next {
            *next = candidate;
        }
        *next
    }

    fn clock(&self, category: ServiceCategory) -> &CategoryClock {
        // Every category is inserted in `new`.
        &self.clocks[&category]
    }

    fn lock(&self, category: ServiceCategory) -> std::sync::MutexGuard<'_, Instant> {
        self.clock(category)
            .next
            .lock()
            .expect("throttle clock lock poisoned")
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&FxHashMap::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for category in ServiceCategory::ALL {
            map.entry(&category, &self.interval(category));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(category: ServiceCategory, interval: Duration) -> RateLimiter {
        let mut intervals = FxHashMap::default();
        intervals.insert(category, interval);
        RateLimiter::new(&intervals)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        limiter.acquire(ServiceCategory::Compute).await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_requests() {
        let limiter = limiter_with(ServiceCategory::Compute, Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire(ServiceCategory::Compute).await;
        limiter.acquire(ServiceCategory::Compute).await;
        limiter.acquire(ServiceCategory::Compute).await;
        assert_eq!(Instant::now() - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_categories_are_independent() {
        let limiter = limiter_with(ServiceCategory::Compute, Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire(ServiceCategory::Compute).await;
        limiter.acquire(ServiceCategory::Storage).await;
        limiter.wait(ServiceCategory::Tasks).await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_mark() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        limiter.mark(ServiceCategory::Status, Duration::from_millis(300));
        limiter.wait(ServiceCategory::Status).await;
        assert_eq!(Instant::now() - start, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_raise_keeps_later_deadline() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        limiter.raise(ServiceCategory::Tasks, Duration::from_secs(10));
        let deadline = limiter.raise(ServiceCategory::Tasks, Duration::from_secs(3));
        assert_eq!(deadline, start + Duration::from_secs(10));

        let deadline = limiter.raise(ServiceCategory::Tasks, Duration::from_secs(20));
        assert_eq!(deadline, start + Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_intervals_saturate() {
        let limiter = limiter_with(ServiceCategory::Compute, Duration::MAX);
        let start = Instant::now();
        limiter.acquire(ServiceCategory::Compute).await;
        assert_eq!(limiter.deadline(ServiceCategory::Compute), start + FAR_FUTURE);

        let deadline = limiter.raise(ServiceCategory::Status, Duration::MAX);
        assert_eq!(deadline, start + FAR_FUTURE);
        limiter.mark(ServiceCategory::Tasks, Duration::MAX);
        assert_eq!(limiter.deadline(ServiceCategory::Tasks), start + FAR_FUTURE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_respects_interval() {
        let limiter = std::sync::Arc::new(limiter_with(
            ServiceCategory::Utilities,
            Duration::from_millis(100),
        ));
        let start = Instant::now();
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire(ServiceCategory::Utilities).await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();
        assert_eq!(times[0], start);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }
}
