//! Token bucket shared by the per-client, per-tier and per-fingerprint limiters.

use tokio::time::Instant;

/// A continuously refilling token bucket.
///
/// Starts full at `capacity` tokens and refills at `refill_rate` tokens per
/// second. Refill is computed lazily from the elapsed time on every access.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    pub fn new(refill_rate: f64, capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        self.tokens = self.refilled(now);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens available right now, without consuming any.
    pub fn tokens(&self) -> f64 {
        self.refilled(Instant::now())
    }

    /// Remaining whole tokens, floored at zero. Used for `X-RateLimit-Remaining`.
    pub fn remaining(&self) -> u64 {
        self.tokens().floor().max(0.0) as u64
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    fn refilled(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.capacity)
    }
}
