use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token-bucket limiter keyed by client address.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    capacity: f64,
    /// Tokens regained per second.
    refill_rate: f64,
}

struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

impl RateLimiter {
    /// `burst` requests at once, then one more every `per_seconds`.
    pub fn new(burst: u32, per_seconds: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity: burst as f64,
            refill_rate: 1.0 / per_seconds,
        }
    }

    /// Take a token for `key`. On refusal returns how long until one is available.
    pub fn acquire(&self, key: &str) -> Result<(), Duration> {
        self.acquire_at(key, Instant::now())
    }

    fn acquire_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_seen).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX))
        }
    }

    /// Drop buckets not touched within `idle`.
    pub fn sweep(&self, idle: Duration) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let Some(cutoff) = Instant::now().checked_sub(idle) else {
            return;
        };
        buckets.retain(|_, b| b.last_seen > cutoff);
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
