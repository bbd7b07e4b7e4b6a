//! Process-wide request throttling using a token bucket.
//!
//! The gateway acquires one token per model call; tokens refill continuously
//! at the configured requests-per-minute rate, with burst capacity equal to
//! one minute's budget. Unlike a per-tenant limiter this is a single global
//! bucket: every stage of every in-flight message shares the same provider
//! quota.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Global requests-per-minute throttle.
pub struct RequestRateLimiter {
    max_rpm: u32,
    bucket: Mutex<Bucket>,
}

impl RequestRateLimiter {
    /// A limit of 0 disables throttling entirely.
    #[must_use]
    pub fn new(max_rpm: u32) -> Self {
        Self {
            max_rpm,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(max_rpm),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a request token is available, then consume it.
    pub async fn acquire(&self) {
        if self.max_rpm == 0 {
            return;
        }
        let per_second = f64::from(self.max_rpm) / 60.0;

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens =
                    (bucket.tokens + elapsed * per_second).min(f64::from(self.max_rpm));
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - bucket.tokens;
                Duration::from_secs_f64(deficit / per_second)
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            sleep(wait).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
