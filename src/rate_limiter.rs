use crate::clock::{Clock, MonotonicClock};
use crate::error::RateLimitError;
use crate::store::{BucketStore, MemoryBucketStore};
use crate::token_bucket::{BucketConfig, RateLimitResult, TokenBucket};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Maps caller keys to independent token buckets.
///
/// Cloning is cheap and clones share the same buckets.
pub struct RateLimiterRegistry<S: BucketStore = MemoryBucketStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: BucketStore> Clone for RateLimiterRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Point-in-time view of a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub key: String,
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub consumed: u64,
    pub blocked: u64,
    #[serde(with = "humantime_serde")]
    pub idle_for: Duration,
}

impl BucketStats {
    fn from_bucket(key: &str, bucket: &TokenBucket, now: Duration) -> Self {
        let view = bucket.peek(now);
        Self {
            key: key.to_string(),
            tokens: view.tokens(),
            capacity: view.capacity(),
            refill_rate: view.refill_rate(),
            consumed: view.consumed(),
            blocked: view.blocked(),
            idle_for: now.saturating_sub(bucket.last_refill()),
        }
    }
}

impl RateLimiterRegistry<MemoryBucketStore> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_store(MemoryBucketStore::new(), clock)
    }
}

impl Default for RateLimiterRegistry<MemoryBucketStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BucketStore> RateLimiterRegistry<S> {
    pub fn with_store(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(store),
            clock,
        }
    }

    /// Creates a bucket for `key` unless one exists. Returns `true` if created.
    pub fn create_bucket(&self, key: &str, config: &BucketConfig) -> Result<bool, RateLimitError> {
        let bucket = TokenBucket::new(config, self.clock.now())?;
        let created = self.store.insert_if_absent(key, bucket)?;

        if created {
            info!(
                key = %key,
                capacity = config.capacity,
                refill_rate = config.refill_rate,
                "Created bucket"
            );
        }
        Ok(created)
    }

    /// Tries to take `requested` tokens from the bucket for `key`.
    ///
    /// A missing bucket is created from `config`. When the bucket already
    /// exists `config` is ignored: the running bucket is authoritative, so
    /// callers may pass their config on every call without reconfiguring it.
    pub fn check(
        &self,
        key: &str,
        requested: u32,
        config: Option<&BucketConfig>,
    ) -> Result<RateLimitResult, RateLimitError> {
        let clock = &self.clock;
        let consume = |bucket: &mut TokenBucket| bucket.try_consume(clock.now(), requested);

        let outcome = match self.store.lock_scope(key, None, consume)? {
            Some(outcome) => outcome,
            None => {
                let config =
                    config.ok_or_else(|| RateLimitError::UnknownBucket(key.to_string()))?;
                let init = TokenBucket::new(config, clock.now())?;
                // A bucket is only created for a request it could grant.
                init.ensure_satisfiable(requested)?;

                self.store
                    .lock_scope(key, Some(init), consume)?
                    .ok_or_else(|| RateLimitError::UnknownBucket(key.to_string()))?
            }
        };
        let result = outcome?;

        debug!(
            key = %key,
            requested,
            allowed = result.allowed,
            remaining = result.remaining_tokens,
            "Rate limit check"
        );
        Ok(result)
    }

    /// Tops up the bucket for `key`. Returns the new token count.
    pub fn add_tokens(&self, key: &str, amount: f64) -> Result<f64, RateLimitError> {
        let clock = &self.clock;
        self.store
            .lock_scope(key, None, |bucket| bucket.add_tokens(clock.now(), amount))?
            .ok_or_else(|| RateLimitError::UnknownBucket(key.to_string()))?
    }

    pub fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let clock = &self.clock;
        self.store
            .lock_scope(key, None, |bucket| bucket.reset(clock.now()))?
            .ok_or_else(|| RateLimitError::UnknownBucket(key.to_string()))?;

        info!(key = %key, "Reset bucket");
        Ok(())
    }

    /// Removes the bucket for `key`. Returns `false` if there was none.
    pub fn remove(&self, key: &str) -> Result<bool, RateLimitError> {
        let removed = self.store.remove_state(key)?;
        if removed {
            info!(key = %key, "Removed bucket");
        }
        Ok(removed)
    }

    /// Removes every bucket idle for longer than `max_age`. Returns how many.
    pub fn remove_stale_buckets(&self, max_age: Duration) -> Result<usize, RateLimitError> {
        let now = self.clock.now();
        let removed = self
            .store
            .retain(|_, bucket| !bucket.is_stale(now, max_age))?;

        if removed > 0 {
            info!(removed, max_age = ?max_age, "Removed stale buckets");
        }
        Ok(removed)
    }

    pub fn get_stats(&self, key: &str) -> Result<Option<BucketStats>, RateLimitError> {
        let now = self.clock.now();
        Ok(self
            .store
            .get_state(key)?
            .map(|bucket| BucketStats::from_bucket(key, &bucket, now)))
    }

    /// Stats for every bucket, ordered by key.
    pub fn get_all_stats(&self) -> Result<Vec<BucketStats>, RateLimitError> {
        let now = self.clock.now();
        let mut stats: Vec<BucketStats> = self
            .store
            .snapshot()?
            .iter()
            .map(|(key, bucket)| BucketStats::from_bucket(key, bucket, now))
            .collect();

        stats.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(stats)
    }

    pub fn len(&self) -> Result<usize, RateLimitError> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool, RateLimitError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry() -> (RateLimiterRegistry, ManualClock) {
        let clock = ManualClock::new();
        (RateLimiterRegistry::with_clock(Arc::new(clock.clone())), clock)
    }

    fn config(capacity: f64, refill_rate: f64) -> BucketConfig {
        BucketConfig::new(capacity, refill_rate).unwrap()
    }

    #[test]
    fn test_unknown_bucket_without_config() {
        let (registry, _) = registry();
        assert_eq!(
            registry.check("user-1", 1, None),
            Err(RateLimitError::UnknownBucket("user-1".to_string()))
        );
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn test_lazy_creation_then_config_optional() {
        let (registry, _) = registry();
        let cfg = config(3.0, 1.0);

        assert!(registry.check("user-1", 1, Some(&cfg)).unwrap().allowed);
        let result = registry.check("user-1", 1, None).unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_tokens, 1.0);
    }

    #[test]
    fn test_existing_bucket_ignores_new_config() {
        let (registry, _) = registry();
        registry.check("user-1", 1, Some(&config(2.0, 1.0))).unwrap();

        let result = registry.check("user-1", 1, Some(&config(100.0, 50.0))).unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_tokens, 0.0);

        let stats = registry.get_stats("user-1").unwrap().unwrap();
        assert_eq!(stats.capacity, 2.0);
        assert_eq!(stats.refill_rate, 1.0);
    }

    #[test]
    fn test_create_bucket_is_idempotent() {
        let (registry, _) = registry();
        assert!(registry.create_bucket("k", &config(5.0, 1.0)).unwrap());
        assert!(!registry.create_bucket("k", &config(9.0, 1.0)).unwrap());
        assert_eq!(registry.get_stats("k").unwrap().unwrap().capacity, 5.0);
    }

    #[test]
    fn test_keys_are_independent() {
        let (registry, _) = registry();
        let cfg = config(1.0, 1.0);

        assert!(registry.check("a", 1, Some(&cfg)).unwrap().allowed);
        assert!(!registry.check("a", 1, Some(&cfg)).unwrap().allowed);
        assert!(registry.check("b", 1, Some(&cfg)).unwrap().allowed);
    }

    #[test]
    fn test_refill_through_registry() {
        let (registry, clock) = registry();
        registry.check("k", 5, Some(&config(5.0, 2.0))).unwrap();

        clock.advance(Duration::from_millis(1500));
        let stats = registry.get_stats("k").unwrap().unwrap();
        assert_eq!(stats.tokens, 3.0);
        assert_eq!(stats.idle_for, Duration::from_millis(1500));

        // Reading stats leaves last_refill where it was.
        clock.advance(Duration::from_millis(500));
        let stats = registry.get_stats("k").unwrap().unwrap();
        assert_eq!(stats.idle_for, Duration::from_secs(2));
        assert_eq!(registry.check("k", 4, None).unwrap().remaining_tokens, 0.0);
    }

    #[test]
    fn test_add_tokens_reset_and_remove() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.add_tokens("k", 1.0),
            Err(RateLimitError::UnknownBucket(_))
        ));
        assert!(matches!(registry.reset("k"), Err(RateLimitError::UnknownBucket(_))));

        registry.check("k", 10, Some(&config(10.0, 1.0))).unwrap();
        assert_eq!(registry.add_tokens("k", 4.0).unwrap(), 4.0);
        assert_eq!(registry.add_tokens("k", 40.0).unwrap(), 10.0);

        registry.check("k", 10, None).unwrap();
        registry.check("k", 1, None).unwrap();
        registry.reset("k").unwrap();
        let stats = registry.get_stats("k").unwrap().unwrap();
        assert_eq!(stats.tokens, 10.0);
        assert_eq!(stats.consumed, 0);
        assert_eq!(stats.blocked, 0);

        assert!(registry.remove("k").unwrap());
        assert!(!registry.remove("k").unwrap());
        assert_eq!(registry.get_stats("k").unwrap(), None);
    }

    #[test]
    fn test_counters() {
        let (registry, _) = registry();
        let cfg = config(3.0, 1.0);
        registry.check("k", 2, Some(&cfg)).unwrap();
        registry.check("k", 2, None).unwrap();
        registry.check("k", 1, None).unwrap();

        let stats = registry.get_stats("k").unwrap().unwrap();
        assert_eq!(stats.consumed, 3);
        assert_eq!(stats.blocked, 1);
    }

    #[test]
    fn test_remove_stale_buckets() {
        let (registry, clock) = registry();
        let cfg = config(5.0, 1.0);
        registry.check("old", 1, Some(&cfg)).unwrap();

        clock.advance(Duration::from_secs(50));
        registry.check("fresh", 1, Some(&cfg)).unwrap();

        clock.advance(Duration::from_secs(20));
        assert_eq!(registry.remove_stale_buckets(Duration::from_secs(60)).unwrap(), 1);

        let keys: Vec<String> = registry
            .get_all_stats()
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["fresh".to_string()]);
    }

    #[test]
    fn test_all_stats_sorted() {
        let (registry, _) = registry();
        let cfg = config(5.0, 1.0);
        for key in ["c", "a", "b"] {
            registry.check(key, 1, Some(&cfg)).unwrap();
        }

        let keys: Vec<String> = registry
            .get_all_stats()
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejected_request_creates_no_bucket() {
        let (registry, _) = registry();
        let cfg = config(5.0, 1.0);
        assert!(matches!(
            registry.check("k", 6, Some(&cfg)),
            Err(RateLimitError::UnsatisfiableRequest { .. })
        ));
        assert!(matches!(
            registry.check("k", 0, Some(&cfg)),
            Err(RateLimitError::InvalidRequest(_))
        ));

        assert_eq!(registry.get_stats("k").unwrap(), None);
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn test_unsatisfiable_leaves_existing_bucket_untouched() {
        let (registry, _) = registry();
        let cfg = config(5.0, 1.0);
        registry.create_bucket("k", &cfg).unwrap();

        // The existing bucket's capacity decides, not the supplied config.
        assert!(matches!(
            registry.check("k", 6, Some(&config(50.0, 1.0))),
            Err(RateLimitError::UnsatisfiableRequest { .. })
        ));

        let stats = registry.get_stats("k").unwrap().unwrap();
        assert_eq!(stats.tokens, 5.0);
        assert_eq!(stats.blocked, 0);
    }
}
