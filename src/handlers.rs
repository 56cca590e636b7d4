use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ApiError, ConfigError, RateLimitError, ShortenerError};
use crate::key_generator::{KeyGenerator, KeyStrategy};
use crate::rate_limiter::RateLimiterRegistry;
use crate::response::{
    BucketResponse, CheckResponse, DeleteResponse, HealthResponse, ShortenResponse, SweepResponse,
};
use crate::shortener::{ShortCodeGenerator, ShortenOptions, UrlShortenerStore};
use crate::token_bucket::BucketConfig;
use crate::validation::{
    AddTokensRequest, CheckRequest, CreateBucketRequest, RequestValidator, ShortenRequest,
    SweepRequest,
};

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Everything the handlers need. Built once by the server and passed down.
pub struct AppState {
    pub registry: RateLimiterRegistry,
    pub shortener: UrlShortenerStore,
    pub default_bucket: BucketConfig,
    pub key_generator: KeyGenerator,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let generator =
            ShortCodeGenerator::new(config.short_code_length, config.max_collision_retries)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self {
            registry: RateLimiterRegistry::new(),
            shortener: UrlShortenerStore::new(generator),
            default_bucket: config.default_bucket_config()?,
            key_generator: KeyGenerator::new(KeyStrategy::IpAddress),
        })
    }
}

/// Create a bucket for a key
pub async fn create_bucket(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Json(payload): Json<CreateBucketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    RequestValidator::validate_key(&key)?;
    let payload = RequestValidator::validate_body(payload)?;
    let config = RequestValidator::bucket_config(&payload)?;

    if state.registry.create_bucket(&key, &config)? {
        Ok((StatusCode::CREATED, Json(BucketResponse::created(key))))
    } else {
        Ok((StatusCode::OK, Json(BucketResponse::status(key, "exists"))))
    }
}

/// Check rate limit for a key. An empty body asks for one token.
pub async fn check_rate_limit(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    RequestValidator::validate_key(&key)?;
    let payload = RequestValidator::validate_body(RequestValidator::check_body(&body)?)?;
    let config = RequestValidator::check_config(&payload)?;

    let result = state
        .registry
        .check(&key, payload.tokens.unwrap_or(1), config.as_ref())?;

    let mut resp = Json(CheckResponse::new(key, &result)).into_response();

    // Add rate limit headers
    let headers = resp.headers_mut();
    headers.insert(
        "x-ratelimit-limit",
        HeaderValue::from(result.capacity.floor() as u64),
    );
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from(result.remaining_tokens.floor() as u64),
    );

    if let Some(retry_after) = result.retry_after {
        *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        resp.headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
    }

    Ok(resp)
}

/// Get bucket stats for a key
pub async fn get_bucket(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    RequestValidator::validate_key(&key)?;

    let stats = state
        .registry
        .get_stats(&key)?
        .ok_or(RateLimitError::UnknownBucket(key))?;
    Ok(Json(stats))
}

/// Stats for every bucket
pub async fn list_buckets(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.registry.get_all_stats()?))
}

/// Add tokens to a bucket
pub async fn add_tokens(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Json(payload): Json<AddTokensRequest>,
) -> Result<impl IntoResponse, ApiError> {
    RequestValidator::validate_key(&key)?;
    let payload = RequestValidator::validate_body(payload)?;

    let tokens = state.registry.add_tokens(&key, payload.amount)?;
    Ok(Json(BucketResponse::tokens(key, tokens)))
}

/// Refill a bucket to its initial level
pub async fn reset_bucket(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    RequestValidator::validate_key(&key)?;

    state.registry.reset(&key)?;
    Ok(Json(BucketResponse::status(key, "reset")))
}

/// Delete the bucket for a key
pub async fn delete_bucket(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    RequestValidator::validate_key(&key)?;

    let status = if state.registry.remove(&key)? {
        "deleted"
    } else {
        "absent"
    };
    Ok(Json(BucketResponse::status(key, status)))
}

/// Drop buckets idle for longer than the requested age
pub async fn sweep_buckets(
    State(state): State<SharedState>,
    Json(payload): Json<SweepRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.registry.remove_stale_buckets(payload.max_age)?;
    Ok(Json(SweepResponse { removed }))
}

/// Shorten a URL
pub async fn shorten(
    State(state): State<SharedState>,
    Json(payload): Json<ShortenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = RequestValidator::validate_body(payload)?;
    let options = ShortenOptions {
        custom_alias: payload.custom_alias,
    };

    let outcome = state.shortener.shorten(&payload.url, &options)?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ShortenResponse::from(outcome))))
}

/// Redirect a short code to its URL
pub async fn redirect(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let url = state.shortener.expand(&code)?;
    Ok(Redirect::temporary(&url))
}

/// Get the stored record for a short code
pub async fn get_link(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .shortener
        .get_stats(&code)?
        .ok_or(ShortenerError::NotFound(code))?;
    Ok(Json(record))
}

/// All stored records
pub async fn list_links(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.shortener.list_all()?))
}

/// Delete a short code
pub async fn delete_link(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.shortener.delete(&code)?;
    Ok(Json(DeleteResponse { code, deleted }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(HealthResponse::healthy(
        state.registry.len()?,
        state.shortener.len()?,
    )))
}
