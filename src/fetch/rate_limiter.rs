use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Length of the sliding admission window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window admission control shared by every fetch in the process.
///
/// The window holds the instants of admitted requests. Pruning, deciding and
/// recording happen while the async mutex is held, including the wait for a
/// slot, so concurrent callers queue behind each other instead of all
/// observing free capacity at once.
///
/// Uses `tokio::time::Instant`, so tests running with a paused clock see
/// deterministic waits.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    admitted: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            admitted: AtomicU64::new(0),
        }
    }

    /// Waits until one more request fits under `max_per_minute`, records it,
    /// and returns how long the caller was held back.
    ///
    /// A ceiling of 0 is treated as 1. Cancel-safe: dropping the future
    /// before it resolves records nothing.
    pub async fn admit(&self, max_per_minute: u32) -> Duration {
        let ceiling = max_per_minute.max(1) as usize;
        let started = Instant::now();
        let mut window = self.window.lock().await;

        loop {
            let now = Instant::now();
            while let Some(&oldest) = window.front() {
                if now.duration_since(oldest) >= WINDOW {
                    window.pop_front();
                } else {
                    break;
                }
            }

            if window.len() < ceiling {
                window.push_back(now);
                self.admitted.fetch_add(1, Ordering::Relaxed);
                return now.duration_since(started);
            }

            // Window is full: the front entry is the next to expire
            let Some(&oldest) = window.front() else {
                continue;
            };
            let sleep_for = WINDOW.saturating_sub(now.duration_since(oldest));
            tracing::info!(
                wait_ms = sleep_for.as_millis() as u64,
                in_window = window.len(),
                ceiling = ceiling,
                "Rate limit reached, waiting for a free slot"
            );
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Total admissions granted since construction.
    pub fn admitted_total(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Number of admissions currently inside the trailing window.
    #[cfg(test)]
    pub(crate) async fn in_window(&self) -> usize {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        window.retain(|t| now.duration_since(*t) < WINDOW);
        window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn assert_window_respected(times: &[Instant], ceiling: usize) {
        // Any ceiling+1 consecutive admissions must span at least a full window
        for pair in times.windows(ceiling + 1) {
            let span = pair[ceiling].duration_since(pair[0]);
            assert!(
                span >= WINDOW,
                "{} admissions within {:?}",
                ceiling + 1,
                span
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_immediately_under_ceiling() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            let waited = limiter.admit(5).await;
            assert_eq!(waited, Duration::ZERO);
        }
        assert_eq!(limiter.admitted_total(), 5);
        assert_eq!(limiter.in_window().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new();
        limiter.admit(2).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.admit(2).await;

        let start = Instant::now();
        let waited = limiter.admit(2).await;
        // Oldest admission is 10s old, so 50s remain in its window
        assert!(waited >= Duration::from_secs(50), "waited {waited:?}");
        assert!(waited < Duration::from_secs(51), "waited {waited:?}");
        assert!(start.elapsed() >= Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ceiling_treated_as_one() {
        let limiter = RateLimiter::new();
        limiter.admit(0).await;
        let waited = limiter.admit(0).await;
        assert!(waited >= WINDOW, "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_pruned() {
        let limiter = RateLimiter::new();
        limiter.admit(3).await;
        limiter.admit(3).await;
        tokio::time::advance(WINDOW).await;
        assert_eq!(limiter.in_window().await, 0);
        assert_eq!(limiter.admit(3).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_burst() {
        let limiter = Arc::new(RateLimiter::new());
        let ceiling = 3;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.admit(ceiling).await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        assert_window_respected(&times, ceiling as usize);
        assert_eq!(limiter.admitted_total(), 10);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_window_exceeds_ceiling(
            ceiling in 1u32..6,
            gaps in proptest::collection::vec(0u64..40, 1..25),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let times = rt.block_on(async {
                let limiter = RateLimiter::new();
                let mut times = Vec::with_capacity(gaps.len());
                for gap in &gaps {
                    tokio::time::advance(Duration::from_secs(*gap)).await;
                    limiter.admit(ceiling).await;
                    times.push(Instant::now());
                }
                times
            });

            assert_window_respected(&times, ceiling as usize);
        }
    }
}
