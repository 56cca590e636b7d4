use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the token bucket and the bucket registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    #[error("Invalid bucket configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No bucket exists for key '{0}' and no configuration was supplied")]
    UnknownBucket(String),

    /// The request can never be satisfied, no matter how long the caller waits.
    #[error("Requested {requested} tokens but bucket capacity is {capacity}")]
    UnsatisfiableRequest { requested: u32, capacity: f64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the URL shortener.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShortenerError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL is {length} bytes long, maximum is {max}")]
    UrlTooLong { length: usize, max: usize },

    #[error("Invalid alias: {0}")]
    InvalidAlias(String),

    #[error("Invalid shortener configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Alias '{0}' is already taken")]
    AliasCollision(String),

    #[error("Could not find a free short code after {attempts} attempts")]
    CollisionResolutionFailed { attempts: u32 },

    #[error("Short code '{0}' not found")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading or checking the service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from the environment: {0}")]
    Env(#[from] envconfig::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Shortener(#[from] ShortenerError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Duration },
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_api_error(err: &ApiError) -> Self {
        let message = err.to_string();
        match err {
            ApiError::RateLimit(inner) => match inner {
                RateLimitError::InvalidConfiguration(_) => {
                    Self::new("invalid_configuration", &message, 400)
                }
                RateLimitError::UnknownBucket(_) => Self::new("unknown_bucket", &message, 404),
                RateLimitError::UnsatisfiableRequest { .. } => {
                    Self::new("unsatisfiable_request", &message, 422)
                }
                RateLimitError::InvalidRequest(_) => Self::new("bad_request", &message, 400),
                RateLimitError::Internal(_) => Self::new("internal_error", &message, 500),
            },
            ApiError::Shortener(inner) => match inner {
                ShortenerError::InvalidUrl(_) => Self::new("invalid_url", &message, 400),
                ShortenerError::UrlTooLong { .. } => Self::new("url_too_long", &message, 400),
                ShortenerError::InvalidAlias(_) => Self::new("invalid_alias", &message, 400),
                ShortenerError::InvalidConfiguration(_) => {
                    Self::new("configuration_error", &message, 500)
                }
                ShortenerError::AliasCollision(_) => Self::new("alias_collision", &message, 409),
                ShortenerError::CollisionResolutionFailed { .. } => {
                    Self::new("collision_resolution_failed", &message, 503)
                }
                ShortenerError::NotFound(_) => Self::new("not_found", &message, 404),
                ShortenerError::Internal(_) => Self::new("internal_error", &message, 500),
            },
            ApiError::Validation(_) => Self::new("validation_error", &message, 422),
            ApiError::RateLimited { .. } => Self::new("rate_limit_exceeded", &message, 429),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_api_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after.as_secs().max(1)),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ApiError::from(RateLimitError::UnknownBucket("user-1".into()));
        assert_eq!(ErrorResponse::from_api_error(&err).code, 404);

        let err = ApiError::from(ShortenerError::AliasCollision("docs".into()));
        assert_eq!(ErrorResponse::from_api_error(&err).code, 409);

        let err = ApiError::from(ShortenerError::CollisionResolutionFailed { attempts: 5 });
        let body = ErrorResponse::from_api_error(&err);
        assert_eq!(body.code, 503);
        assert_eq!(body.error, "collision_resolution_failed");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after: Duration::from_secs(3),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }

    #[test]
    fn test_unsatisfiable_is_distinct_from_deny() {
        let err = RateLimitError::UnsatisfiableRequest {
            requested: 20,
            capacity: 10.0,
        };
        assert_eq!(
            err.to_string(),
            "Requested 20 tokens but bucket capacity is 10"
        );
    }
}
