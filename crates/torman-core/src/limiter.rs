//! Process-wide rate limiter shared by every active session
//!
//! Holds two independent token-bucket budgets, one per transfer direction.
//! Every session's I/O path acquires tokens from the same buckets, so the
//! limits are global across all jobs. Limit updates are published through
//! atomics and take effect for all sessions immediately; a reader never
//! observes a torn update.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sentinel limit meaning "no throttling".
pub const UNLIMITED: u64 = u64::MAX;

/// Transfer direction for budget selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

/// Global rate limiter with per-direction budgets.
///
/// Cheap to clone; all clones share the same budgets.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Budgets>,
}

struct Budgets {
    download: Budget,
    upload: Budget,
}

struct Budget {
    /// Published limit in bytes/sec. Readers load this without taking the
    /// bucket lock.
    limit: AtomicU64,
    bucket: Mutex<BucketState>,
}

struct BucketState {
    /// Current available tokens (bytes).
    tokens: f64,
    /// Last token refill time.
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter with both directions unlimited.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Budgets {
                download: Budget::new(UNLIMITED),
                upload: Budget::new(UNLIMITED),
            }),
        }
    }

    /// Update the download budget. A limit of 0 or `u64::MAX` disables
    /// throttling for that direction.
    pub fn set_download_limit(&self, bytes_per_second: u64) {
        self.inner.download.set_limit(bytes_per_second);
    }

    /// Update the upload budget.
    pub fn set_upload_limit(&self, bytes_per_second: u64) {
        self.inner.upload.set_limit(bytes_per_second);
    }

    /// Current `(download, upload)` limits in bytes/sec.
    pub fn current_limits(&self) -> (u64, u64) {
        (
            self.inner.download.limit.load(Ordering::Acquire),
            self.inner.upload.limit.load(Ordering::Acquire),
        )
    }

    /// Acquire tokens for transferring `bytes` in the given direction.
    /// Blocks (asynchronously) until enough tokens are available.
    pub async fn acquire(&self, direction: Direction, bytes: u64) {
        let budget = match direction {
            Direction::Download => &self.inner.download,
            Direction::Upload => &self.inner.upload,
        };
        budget.acquire(bytes).await;
    }

    /// Non-blocking acquire. Returns false if the budget is exhausted.
    pub fn try_acquire(&self, direction: Direction, bytes: u64) -> bool {
        let budget = match direction {
            Direction::Download => &self.inner.download,
            Direction::Upload => &self.inner.upload,
        };
        budget.try_acquire(bytes)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Budget {
    fn new(bytes_per_second: u64) -> Self {
        let limit = normalize(bytes_per_second);
        Self {
            limit: AtomicU64::new(limit),
            bucket: Mutex::new(BucketState {
                // Start with a full second's worth of tokens.
                tokens: capacity(limit),
                last_refill: Instant::now(),
            }),
        }
    }

    fn set_limit(&self, bytes_per_second: u64) {
        let limit = normalize(bytes_per_second);
        self.limit.store(limit, Ordering::Release);

        // Don't let banked tokens exceed the new capacity.
        let mut bucket = self.bucket.lock();
        bucket.tokens = bucket.tokens.min(capacity(limit));
    }

    async fn acquire(&self, bytes: u64) {
        // Cap each acquire so large requests don't starve other sessions.
        let bytes_to_acquire = bytes.min(16384);

        loop {
            let limit = self.limit.load(Ordering::Acquire);
            if limit == UNLIMITED {
                return;
            }

            let wait = {
                let mut bucket = self.bucket.lock();
                refill(&mut bucket, limit);

                if bucket.tokens >= bytes_to_acquire as f64 {
                    bucket.tokens -= bytes_to_acquire as f64;
                    return;
                }

                // Not enough tokens. Wait a small slice so other sessions
                // get fair access, then re-check.
                let needed = bytes_to_acquire as f64 - bucket.tokens;
                let wait_secs = needed / limit as f64;
                Duration::from_secs_f64(wait_secs.min(0.05))
            };

            // Sleep outside the lock so other sessions can also check.
            if wait > Duration::ZERO {
                tokio::time::sleep(wait).await;
            }
        }
    }

    fn try_acquire(&self, bytes: u64) -> bool {
        let limit = self.limit.load(Ordering::Acquire);
        if limit == UNLIMITED {
            return true;
        }

        let mut bucket = self.bucket.lock();
        refill(&mut bucket, limit);

        if bucket.tokens >= bytes as f64 {
            bucket.tokens -= bytes as f64;
            true
        } else {
            false
        }
    }
}

fn normalize(bytes_per_second: u64) -> u64 {
    if bytes_per_second == 0 {
        UNLIMITED
    } else {
        bytes_per_second
    }
}

fn capacity(limit: u64) -> f64 {
    if limit == UNLIMITED {
        f64::MAX
    } else {
        limit as f64
    }
}

/// Refill tokens based on elapsed time, capped at one second's capacity.
fn refill(bucket: &mut BucketState, limit: u64) {
    let now = Instant::now();
    let elapsed_secs = now.duration_since(bucket.last_refill).as_secs_f64();

    if elapsed_secs > 0.001 {
        let new_tokens = elapsed_secs * limit as f64;
        bucket.tokens = (bucket.tokens + new_tokens).min(capacity(limit));
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn throttles_once_bucket_is_drained() {
        let limiter = RateLimiter::new();
        limiter.set_download_limit(1000); // 1 KB/s

        let start = Instant::now();
        limiter.acquire(Direction::Download, 500).await;
        assert!(start.elapsed().as_millis() < 50);

        limiter.acquire(Direction::Download, 500).await;
        assert!(start.elapsed().as_millis() < 50);

        // Bucket is empty now; this one has to wait for a refill.
        limiter.acquire(Direction::Download, 500).await;
        assert!(start.elapsed().as_millis() >= 400);
    }

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::new();

        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire(Direction::Download, 10000).await;
            limiter.acquire(Direction::Upload, 10000).await;
        }
        assert!(start.elapsed().as_millis() < 50);
    }

    #[tokio::test]
    async fn budgets_are_independent() {
        let limiter = RateLimiter::new();
        limiter.set_upload_limit(1000);

        // Upload budget drained; download stays unlimited.
        limiter.acquire(Direction::Upload, 1000).await;
        let start = Instant::now();
        limiter.acquire(Direction::Download, 100_000).await;
        assert!(start.elapsed().as_millis() < 50);
    }

    #[test]
    fn current_limits_reflect_updates() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.current_limits(), (UNLIMITED, UNLIMITED));

        limiter.set_download_limit(128 * 1024);
        limiter.set_upload_limit(32 * 1024);
        assert_eq!(limiter.current_limits(), (128 * 1024, 32 * 1024));

        // All clones observe the same budgets.
        let clone = limiter.clone();
        clone.set_download_limit(0);
        assert_eq!(limiter.current_limits().0, UNLIMITED);
    }

    #[test]
    fn try_acquire_reports_exhaustion() {
        let limiter = RateLimiter::new();
        limiter.set_download_limit(1000);

        assert!(limiter.try_acquire(Direction::Download, 1000));
        assert!(!limiter.try_acquire(Direction::Download, 1000));
    }
}
