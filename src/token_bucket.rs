//! Token bucket refill and consume arithmetic.
//!
//! A [`TokenBucket`] is plain state. Every operation takes the current
//! timestamp from the caller, so the same code runs against the in-memory
//! store, an external store, or a test clock.

use crate::error::RateLimitError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters a bucket is created from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_rate: f64, // tokens per second
    #[serde(default)]
    pub initial_tokens: Option<f64>,
}

impl BucketConfig {
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, RateLimitError> {
        let config = Self {
            capacity,
            refill_rate,
            initial_tokens: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Start (and reset) the bucket with `tokens` instead of a full bucket.
    pub fn with_initial_tokens(mut self, tokens: f64) -> Result<Self, RateLimitError> {
        self.initial_tokens = Some(tokens);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(RateLimitError::InvalidConfiguration(format!(
                "capacity must be a positive number, got {}",
                self.capacity
            )));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(RateLimitError::InvalidConfiguration(format!(
                "refill rate must be a positive number, got {}",
                self.refill_rate
            )));
        }
        if let Some(initial) = self.initial_tokens {
            if !(0.0..=self.capacity).contains(&initial) {
                return Err(RateLimitError::InvalidConfiguration(format!(
                    "initial tokens must be within [0, {}], got {}",
                    self.capacity, initial
                )));
            }
        }
        Ok(())
    }

    pub fn initial_tokens(&self) -> f64 {
        self.initial_tokens.unwrap_or(self.capacity)
    }
}

/// Outcome of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining_tokens: f64,
    /// Capacity of the bucket that answered
    pub capacity: f64,
    #[serde(with = "humantime_serde")]
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    fn allowed(remaining_tokens: f64, capacity: f64) -> Self {
        Self {
            allowed: true,
            remaining_tokens,
            capacity,
            retry_after: None,
        }
    }

    fn denied(remaining_tokens: f64, capacity: f64, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining_tokens,
            capacity,
            retry_after: Some(retry_after),
        }
    }
}

/// State of a single bucket.
///
/// `last_refill` is an offset from the owning clock's origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    initial_tokens: f64,
    last_refill: Duration,
    consumed: u64,
    blocked: u64,
}

impl TokenBucket {
    pub fn new(config: &BucketConfig, now: Duration) -> Result<Self, RateLimitError> {
        config.validate()?;
        let initial_tokens = config.initial_tokens();

        Ok(Self {
            tokens: initial_tokens,
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            initial_tokens,
            last_refill: now,
            consumed: 0,
            blocked: 0,
        })
    }

    /// Refills, then takes `requested` tokens if they are available.
    ///
    /// A denial is committed along with the refill and carries the whole
    /// number of seconds after which the same request would succeed.
    pub fn try_consume(
        &mut self,
        now: Duration,
        requested: u32,
    ) -> Result<RateLimitResult, RateLimitError> {
        self.ensure_satisfiable(requested)?;
        let wanted = requested as f64;

        self.refill(now);

        if self.tokens >= wanted {
            self.tokens = (self.tokens - wanted).max(0.0);
            self.consumed += requested as u64;
            Ok(RateLimitResult::allowed(self.tokens, self.capacity))
        } else {
            self.blocked += 1;
            let seconds = ((wanted - self.tokens) / self.refill_rate).ceil().max(1.0);
            Ok(RateLimitResult::denied(
                self.tokens,
                self.capacity,
                Duration::from_secs(seconds as u64),
            ))
        }
    }

    /// Fails if a request for `requested` tokens could never be granted by
    /// this bucket. Nothing is mutated.
    pub fn ensure_satisfiable(&self, requested: u32) -> Result<(), RateLimitError> {
        if requested == 0 {
            return Err(RateLimitError::InvalidRequest(
                "requested tokens must be greater than 0".to_string(),
            ));
        }
        if requested as f64 > self.capacity {
            return Err(RateLimitError::UnsatisfiableRequest {
                requested,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Tops the bucket up by `amount`, clamped to capacity. Returns the new count.
    pub fn add_tokens(&mut self, now: Duration, amount: f64) -> Result<f64, RateLimitError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(RateLimitError::InvalidRequest(format!(
                "amount must be a positive number, got {}",
                amount
            )));
        }

        self.refill(now);
        self.tokens = (self.tokens + amount).min(self.capacity);
        Ok(self.tokens)
    }

    /// Restores the initial token count and clears the counters.
    pub fn reset(&mut self, now: Duration) {
        self.tokens = self.initial_tokens;
        self.consumed = 0;
        self.blocked = 0;
        self.last_refill = self.last_refill.max(now);
    }

    /// The bucket as it would look after a refill at `now`. Does not mutate.
    pub fn peek(&self, now: Duration) -> TokenBucket {
        let mut view = *self;
        view.refill(now);
        view
    }

    /// Whether the bucket has been idle for longer than `max_age`.
    pub fn is_stale(&self, now: Duration, max_age: Duration) -> bool {
        now.saturating_sub(self.last_refill) > max_age
    }

    fn refill(&mut self, now: Duration) {
        // A clock regression yields zero elapsed time.
        let elapsed = now.saturating_sub(self.last_refill);

        if !elapsed.is_zero() {
            let tokens_to_add = self.refill_rate * elapsed.as_secs_f64();
            self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
        }
        self.last_refill = self.last_refill.max(now);
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn last_refill(&self) -> Duration {
        self.last_refill
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn blocked(&self) -> u64 {
        self.blocked
    }
}
