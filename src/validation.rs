use crate::error::ApiError;
use crate::token_bucket::BucketConfig;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

static BUCKET_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9:_.@-]{1,128}$").expect("bucket key pattern is valid"));

/// Static segments routed under `/rate-limit/` that would shadow a bucket key.
const RESERVED_KEYS: &[&str] = &["sweep"];

/// Body of `POST /rate-limit/:key`
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBucketRequest {
    #[validate(range(exclusive_min = 0.0))]
    pub capacity: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub refill_rate: f64,
    #[validate(range(min = 0.0))]
    pub initial_tokens: Option<f64>,
}

/// Body of `POST /rate-limit/:key/check`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CheckRequest {
    #[serde(default)]
    #[validate(range(min = 1))]
    pub tokens: Option<u32>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub refill_rate: Option<f64>,
}

/// Body of `POST /rate-limit/:key/tokens`
#[derive(Debug, Deserialize, Validate)]
pub struct AddTokensRequest {
    #[validate(range(exclusive_min = 0.0))]
    pub amount: f64,
}

/// Body of `POST /rate-limit/sweep`
#[derive(Debug, Deserialize)]
pub struct SweepRequest {
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

/// Body of `POST /shorten`
#[derive(Debug, Deserialize, Validate)]
pub struct ShortenRequest {
    #[validate(length(min = 1))]
    pub url: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub custom_alias: Option<String>,
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Validates a rate limit key taken from the path
    pub fn validate_key(key: &str) -> Result<(), ApiError> {
        if !BUCKET_KEY.is_match(key) {
            return Err(ApiError::Validation(
                "Rate limit key must be 1-128 characters of letters, digits and ':_.@-'".to_string(),
            ));
        }
        if RESERVED_KEYS.contains(&key) {
            return Err(ApiError::Validation(format!(
                "'{}' is a reserved path segment and cannot be used as a rate limit key",
                key
            )));
        }
        Ok(())
    }

    /// Parses the body of a check request. Only an empty body falls back to
    /// the defaults; anything else must be a well-formed `CheckRequest`.
    pub fn check_body(body: &[u8]) -> Result<CheckRequest, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(CheckRequest::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::Validation(format!("Invalid check request body: {}", e)))
    }

    /// Validates a body and returns it unchanged
    pub fn validate_body<T: Validate>(body: T) -> Result<T, ApiError> {
        body.validate()?;
        Ok(body)
    }

    pub fn bucket_config(body: &CreateBucketRequest) -> Result<BucketConfig, ApiError> {
        let config = BucketConfig::new(body.capacity, body.refill_rate)?;
        match body.initial_tokens {
            Some(tokens) => Ok(config.with_initial_tokens(tokens)?),
            None => Ok(config),
        }
    }

    /// Inline bucket configuration of a check request. Both fields or neither.
    pub fn check_config(body: &CheckRequest) -> Result<Option<BucketConfig>, ApiError> {
        match (body.capacity, body.refill_rate) {
            (Some(capacity), Some(refill_rate)) => Ok(Some(BucketConfig::new(capacity, refill_rate)?)),
            (None, None) => Ok(None),
            _ => Err(ApiError::Validation(
                "'capacity' and 'refill_rate' must be given together".to_string(),
            )),
        }
    }
}
