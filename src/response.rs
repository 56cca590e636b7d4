use crate::shortener::ShortenOutcome;
use crate::token_bucket::RateLimitResult;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub key: String,
    pub allowed: bool,
    pub remaining: f64,
    pub limit: f64,
    /// Whole seconds until the same request would be allowed
    pub retry_after: Option<u64>,
}

impl CheckResponse {
    pub fn new(key: String, result: &RateLimitResult) -> Self {
        Self {
            key,
            allowed: result.allowed,
            remaining: result.remaining_tokens,
            limit: result.capacity,
            retry_after: result.retry_after.map(|d| d.as_secs()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BucketResponse {
    pub key: String,
    pub status: String,
    pub tokens: Option<f64>,
}

impl BucketResponse {
    pub fn created(key: String) -> Self {
        Self::status(key, "created")
    }

    pub fn status(key: String, status: &str) -> Self {
        Self {
            key,
            status: status.to_string(),
            tokens: None,
        }
    }

    pub fn tokens(key: String, tokens: f64) -> Self {
        Self {
            key,
            status: "updated".to_string(),
            tokens: Some(tokens),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct ShortenResponse {
    pub short_code: String,
    pub original_url: String,
    pub collision_resolved: bool,
    pub created: bool,
}

impl From<ShortenOutcome> for ShortenResponse {
    fn from(outcome: ShortenOutcome) -> Self {
        Self {
            short_code: outcome.record.short_code,
            original_url: outcome.record.original_url,
            collision_resolved: outcome.collision_resolved,
            created: outcome.created,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub code: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub buckets: usize,
    pub links: usize,
}

impl HealthResponse {
    pub fn healthy(buckets: usize, links: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            buckets,
            links,
        }
    }
}
