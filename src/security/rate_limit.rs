//! Per-client rate limiting.
//!
//! # Responsibilities
//! - Token-bucket limiter per client (rate/sec refill, burst capacity)
//! - Bounded LRU cache of limiters keyed by client address
//!
//! # Design Decisions
//! - Create-or-fetch runs under one mutex so concurrent first requests from
//!   the same client share a single limiter
//! - Evicting a client forgets its history; its next request starts with a
//!   full burst
//! - Limiters are shared as `Arc`, so a request holding one keeps using it
//!   even if the cache evicts it meanwhile

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lru::LruCache;

/// Browser clients get `limit * RUM_BURST_MULTIPLIER` tokens of burst.
pub const RUM_BURST_MULTIPLIER: u32 = 3;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, n: f64, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }
}

/// Token-bucket limiter for one client.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// `rate` tokens per second, at most `burst` tokens stored.
    pub fn new(rate: f64, burst: usize) -> Self {
        let burst = burst as f64;
        Self {
            rate,
            burst,
            bucket: Mutex::new(TokenBucket::new(burst)),
        }
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        self.allow_n(1)
    }

    /// Take `n` tokens if all are available; takes none otherwise.
    pub fn allow_n(&self, n: usize) -> bool {
        let mut bucket = self.bucket.lock().expect("rate limiter mutex poisoned");
        bucket.try_acquire(n as f64, self.burst, self.rate)
    }

    pub fn burst(&self) -> usize {
        self.burst as usize
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit cache size must be greater than 0")]
    ZeroSize,
}

/// Bounded cache of per-client limiters, least recently used evicted first.
#[derive(Debug)]
pub struct RateLimitCache {
    cache: Mutex<LruCache<String, Arc<RateLimiter>>>,
    limit: u32,
    burst: usize,
}

impl RateLimitCache {
    /// `size` clients tracked, `limit` events/sec each, burst of
    /// `limit * burst_multiplier`.
    pub fn new(size: usize, limit: u32, burst_multiplier: u32) -> Result<Self, RateLimitError> {
        let capacity = NonZeroUsize::new(size).ok_or(RateLimitError::ZeroSize)?;
        Ok(Self {
            cache: Mutex::new(LruCache::new(capacity)),
            limit,
            burst: limit as usize * burst_multiplier as usize,
        })
    }

    /// Limiter for `key`, created with a full bucket on first use.
    pub fn get_or_create(&self, key: &str) -> Arc<RateLimiter> {
        let mut cache = self.cache.lock().expect("rate limit cache mutex poisoned");
        if let Some(limiter) = cache.get(key) {
            return limiter.clone();
        }

        let limiter = Arc::new(RateLimiter::new(self.limit as f64, self.burst));
        if let Some((evicted, _)) = cache.push(key.to_string(), limiter.clone()) {
            tracing::debug!(client = %evicted, "Evicted rate limiter");
        }
        limiter
    }

    /// Whether `key` is cached. Does not refresh its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.cache
            .lock()
            .expect("rate limit cache mutex poisoned")
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("rate limit cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache
            .lock()
            .expect("rate limit cache mutex poisoned")
            .cap()
            .get()
    }
}
