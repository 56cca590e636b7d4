//! Bucket storage.
//!
//! The registry talks to its buckets only through [`BucketStore`], so the
//! token bucket arithmetic is independent of where the state lives.

use crate::error::RateLimitError;
use crate::token_bucket::TokenBucket;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Storage backend for bucket state.
///
/// `lock_scope` is the only way to mutate a bucket in place, and it must give
/// the closure exclusive access to that bucket for its whole duration.
pub trait BucketStore: Send + Sync {
    /// Runs `f` while holding the lock for `key`.
    ///
    /// A missing bucket is created from `init` first. Returns `Ok(None)` when
    /// the bucket is missing and `init` is `None`.
    fn lock_scope<R, F>(
        &self,
        key: &str,
        init: Option<TokenBucket>,
        f: F,
    ) -> Result<Option<R>, RateLimitError>
    where
        F: FnOnce(&mut TokenBucket) -> R;

    /// Snapshot of one bucket.
    fn get_state(&self, key: &str) -> Result<Option<TokenBucket>, RateLimitError>;

    /// Inserts or overwrites a bucket. Returns `true` if it was newly inserted.
    fn set_state(&self, key: &str, state: TokenBucket) -> Result<bool, RateLimitError>;

    /// Inserts a bucket unless one already exists. Returns `true` if inserted.
    fn insert_if_absent(&self, key: &str, state: TokenBucket) -> Result<bool, RateLimitError>;

    fn remove_state(&self, key: &str) -> Result<bool, RateLimitError>;

    /// Keeps only the buckets for which `keep` returns `true`. Returns the
    /// number removed. No `lock_scope` call may be in flight for a bucket
    /// while `keep` inspects it.
    fn retain<F>(&self, keep: F) -> Result<usize, RateLimitError>
    where
        F: FnMut(&str, &TokenBucket) -> bool;

    /// Snapshots of all buckets.
    fn snapshot(&self) -> Result<Vec<(String, TokenBucket)>, RateLimitError>;

    fn len(&self) -> Result<usize, RateLimitError>;
}

/// In-memory store with one mutex per bucket.
///
/// The key map is read-locked for ordinary bucket access so different keys
/// proceed in parallel. Creation, removal and sweeping take it for writing,
/// which waits out every in-flight `lock_scope`.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: RwLock<HashMap<String, Mutex<TokenBucket>>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(what: &str) -> RateLimitError {
    RateLimitError::Internal(format!("Failed to acquire {} lock on buckets", what))
}

impl BucketStore for MemoryBucketStore {
    fn lock_scope<R, F>(
        &self,
        key: &str,
        init: Option<TokenBucket>,
        f: F,
    ) -> Result<Option<R>, RateLimitError>
    where
        F: FnOnce(&mut TokenBucket) -> R,
    {
        {
            let buckets = self.buckets.read().map_err(|_| poisoned("read"))?;
            if let Some(bucket) = buckets.get(key) {
                let mut bucket = bucket.lock().map_err(|_| poisoned("bucket"))?;
                return Ok(Some(f(&mut *bucket)));
            }
            if init.is_none() {
                return Ok(None);
            }
        }

        // Slow path: the bucket has to be created. Another caller may have
        // created it in between, in which case theirs wins.
        let mut buckets = self.buckets.write().map_err(|_| poisoned("write"))?;
        let bucket = match (buckets.contains_key(key), init) {
            (true, _) => buckets.get_mut(key),
            (false, Some(state)) => Some(
                buckets
                    .entry(key.to_string())
                    .or_insert_with(|| Mutex::new(state)),
            ),
            (false, None) => None,
        };

        match bucket {
            Some(bucket) => {
                let bucket = bucket.get_mut().map_err(|_| poisoned("bucket"))?;
                Ok(Some(f(bucket)))
            }
            None => Ok(None),
        }
    }

    fn get_state(&self, key: &str) -> Result<Option<TokenBucket>, RateLimitError> {
        let buckets = self.buckets.read().map_err(|_| poisoned("read"))?;
        match buckets.get(key) {
            Some(bucket) => Ok(Some(*bucket.lock().map_err(|_| poisoned("bucket"))?)),
            None => Ok(None),
        }
    }

    fn set_state(&self, key: &str, state: TokenBucket) -> Result<bool, RateLimitError> {
        let mut buckets = self.buckets.write().map_err(|_| poisoned("write"))?;
        Ok(buckets
            .insert(key.to_string(), Mutex::new(state))
            .is_none())
    }

    fn insert_if_absent(&self, key: &str, state: TokenBucket) -> Result<bool, RateLimitError> {
        let mut buckets = self.buckets.write().map_err(|_| poisoned("write"))?;
        if buckets.contains_key(key) {
            return Ok(false);
        }
        buckets.insert(key.to_string(), Mutex::new(state));
        Ok(true)
    }

    fn remove_state(&self, key: &str) -> Result<bool, RateLimitError> {
        let mut buckets = self.buckets.write().map_err(|_| poisoned("write"))?;
        Ok(buckets.remove(key).is_some())
    }

    fn retain<F>(&self, mut keep: F) -> Result<usize, RateLimitError>
    where
        F: FnMut(&str, &TokenBucket) -> bool,
    {
        let mut buckets = self.buckets.write().map_err(|_| poisoned("write"))?;
        let initial_count = buckets.len();

        // A bucket whose mutex was poisoned is dropped rather than kept forever.
        buckets.retain(|key, bucket| match bucket.get_mut() {
            Ok(state) => keep(key, state),
            Err(_) => false,
        });

        Ok(initial_count - buckets.len())
    }

    fn snapshot(&self) -> Result<Vec<(String, TokenBucket)>, RateLimitError> {
        let buckets = self.buckets.read().map_err(|_| poisoned("read"))?;
        buckets
            .iter()
            .map(|(key, bucket)| {
                let state = *bucket.lock().map_err(|_| poisoned("bucket"))?;
                Ok((key.clone(), state))
            })
            .collect()
    }

    fn len(&self) -> Result<usize, RateLimitError> {
        let buckets = self.buckets.read().map_err(|_| poisoned("read"))?;
        Ok(buckets.len())
    }
}
