pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod key_generator;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod shortener;
pub mod store;
pub mod sweeper;
pub mod token_bucket;
pub mod validation;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::Config;
pub use error::{ApiError, ConfigError, RateLimitError, ShortenerError};
pub use rate_limiter::{BucketStats, RateLimiterRegistry};
pub use server::create_app;
pub use shortener::{ShortenOptions, ShortenOutcome, ShortenedUrl, UrlShortenerStore};
pub use store::{BucketStore, MemoryBucketStore};
pub use token_bucket::{BucketConfig, RateLimitResult, TokenBucket};
