//! Token-bucket rate limiting for external provider calls

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Token bucket with continuous refill.
///
/// Tokens accumulate at `requests_per_second` up to `burst_size`, computed
/// from elapsed wall-clock time at each check; there is no background
/// timer. One instance is created per external-resource class (embedding,
/// LLM); the instances never share capacity.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
    /// Arrival-order turnstile for `acquire`; tokio's mutex queues waiters
    /// fairly, so grants go out first-come-first-served.
    turn: tokio::sync::Mutex<()>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refreshed: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refreshed).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.refreshed = now;
    }
}

impl RateLimiter {
    /// Create a limiter that refills at `requests_per_second` up to a
    /// `burst_size` cap. The bucket starts full.
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        let capacity = f64::from(burst_size.max(1));
        Self {
            rate: requests_per_second.max(f64::MIN_POSITIVE),
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                refreshed: Instant::now(),
            }),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Wait until a token is available, then consume it.
    ///
    /// Concurrent callers are granted in arrival order as refill makes
    /// tokens available.
    pub async fn acquire(&self) {
        let _turn = self.turn.lock().await;
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().expect("limiter poisoned");
                bucket.refill(self.rate, self.capacity);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a token only if one is already available. Never queues.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().expect("limiter poisoned");
        bucket.refill(self.rate, self.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available, capped at the burst size.
    /// Does not consume anything.
    pub fn available_tokens(&self) -> u32 {
        let bucket = self.bucket.lock().expect("limiter poisoned");
        let elapsed = bucket.refreshed.elapsed().as_secs_f64();
        let tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        tokens.floor() as u32
    }
}
