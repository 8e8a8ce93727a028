//! Request pacing using a token bucket
//!
//! The RequestLimiter caps how many requests per second all fetch workers issue
//! together, so a large pool does not trip the remote service's throttling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tokens are tracked in thousandths of a request so short refill intervals still count
const SCALE: u64 = 1_000;

/// Global request limiter shared by every worker
///
/// # Algorithm
///
/// - A token is one request
/// - Tokens refill continuously at `limit_rps` per second
/// - The bucket holds at most one second's worth of tokens
/// - A worker takes one token before each request and waits when none is left
///
/// All state lives in atomics so acquiring never takes a lock.
#[derive(Clone, Debug)]
pub struct RequestLimiter {
    /// Requests per second (0 = unlimited)
    limit_rps: Arc<AtomicU64>,
    /// Available tokens, scaled by [`SCALE`]
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since an arbitrary epoch)
    last_refill: Arc<AtomicU64>,
}

impl RequestLimiter {
    /// Create a limiter allowing `limit_rps` requests per second (None = unlimited)
    #[must_use]
    pub fn new(limit_rps: Option<u64>) -> Self {
        let limit = limit_rps.unwrap_or(0);
        Self {
            limit_rps: Arc::new(AtomicU64::new(limit)),
            tokens: Arc::new(AtomicU64::new(limit.saturating_mul(SCALE))),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Current limit, None if unlimited
    pub fn limit(&self) -> Option<u64> {
        let limit = self.limit_rps.load(Ordering::Relaxed);
        if limit == 0 { None } else { Some(limit) }
    }

    /// Wait until one request may be issued
    pub async fn acquire(&self) {
        loop {
            let limit = self.limit_rps.load(Ordering::Relaxed);
            if limit == 0 {
                return;
            }

            self.refill_tokens(limit);

            let current = self.tokens.load(Ordering::SeqCst);
            if current >= SCALE {
                if self
                    .tokens
                    .compare_exchange(current, current - SCALE, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            // Time until the missing fraction of a token has refilled
            let missing = SCALE - current;
            let wait_ms = missing * 1_000 / (limit * SCALE);
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(1, 100))).await;
        }
    }

    fn refill_tokens(&self, limit: u64) {
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;

        let to_add = (limit as f64 * SCALE as f64 * elapsed_secs) as u64;
        if to_add == 0 {
            return;
        }

        if self
            .last_refill
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // Concurrent decrements from `acquire` must survive the refill
            let capacity = limit.saturating_mul(SCALE);
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(current.saturating_add(to_add).min(capacity))
                });
        }
    }

    /// Monotonic time in nanoseconds, unaffected by wall-clock changes
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_reporting() {
        assert_eq!(RequestLimiter::new(None).limit(), None);
        assert_eq!(RequestLimiter::new(Some(0)).limit(), None);
        assert_eq!(RequestLimiter::new(Some(5)).limit(), Some(5));
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RequestLimiter::new(None);
        let start = Instant::now();
        for _ in 0..1_000 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_burst_then_throttle() {
        let limiter = RequestLimiter::new(Some(10));
        let start = Instant::now();

        // The initial bucket covers one second's worth of requests
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));

        // Five more need about half a second of refill
        for _ in 0..5 {
            limiter.acquire().await;
        }
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(400),
            "expected throttling, finished in {:?}",
            elapsed
        );
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_shared_across_clones() {
        let limiter = RequestLimiter::new(Some(20));
        let clones: Vec<_> = (0..4).map(|_| limiter.clone()).collect();

        let start = Instant::now();
        let handles: Vec<_> = clones
            .into_iter()
            .map(|l| {
                tokio::spawn(async move {
                    for _ in 0..10 {
                        l.acquire().await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // 40 requests at 20/s with a 20-token burst take roughly one second
        assert!(start.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_acquire_never_exceeds_rate() {
        let limiter = RequestLimiter::new(Some(50));
        let granted = Arc::new(AtomicU64::new(0));
        let window = Duration::from_millis(600);
        let start = Instant::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                let granted = Arc::clone(&granted);
                tokio::spawn(async move {
                    while start.elapsed() < window {
                        limiter.acquire().await;
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // One second of burst plus refill over the elapsed time, with one
        // in-flight acquire per task allowed to land past the window
        let elapsed = start.elapsed().as_secs_f64();
        let ceiling = 50.0 + 50.0 * elapsed + 16.0;
        let granted = granted.load(Ordering::SeqCst) as f64;
        assert!(granted <= ceiling, "granted {granted}, ceiling {ceiling:.1}");
    }
}
