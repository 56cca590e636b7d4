use crate::error::ConfigError;
use crate::token_bucket::BucketConfig;
use envconfig::Envconfig;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Capacity of buckets created without an explicit configuration
    #[envconfig(from = "DEFAULT_CAPACITY", default = "100")]
    pub default_capacity: f64,

    /// Refill rate (tokens per second) of buckets created without an explicit configuration
    #[envconfig(from = "DEFAULT_REFILL_RATE", default = "10")]
    pub default_refill_rate: f64,

    /// Stale bucket sweep interval in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,

    /// Buckets idle for longer than this many seconds are swept
    #[envconfig(from = "STALE_BUCKET_MAX_AGE", default = "3600")]
    pub stale_bucket_max_age_secs: u64,

    /// Length of generated short codes
    #[envconfig(from = "SHORT_CODE_LENGTH", default = "6")]
    pub short_code_length: usize,

    /// Salted retries before short code generation gives up
    #[envconfig(from = "MAX_COLLISION_RETRIES", default = "5")]
    pub max_collision_retries: u32,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Enable request tracing
    #[envconfig(from = "ENABLE_TRACING", default = "true")]
    pub enable_tracing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            default_capacity: 100.0,
            default_refill_rate: 10.0,
            cleanup_interval_secs: 300,
            stale_bucket_max_age_secs: 3600,
            short_code_length: 6,
            max_collision_retries: 5,
            log_level: "info".to_string(),
            enable_tracing: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config::init_from_env()?)
    }

    /// Bucket configuration used when a caller does not supply one
    pub fn default_bucket_config(&self) -> Result<BucketConfig, ConfigError> {
        BucketConfig::new(self.default_capacity, self.default_refill_rate)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stale_bucket_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_bucket_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_env_defaults() {
        let from_env = Config::init_from_hashmap(&HashMap::new()).unwrap();
        let default = Config::default();

        assert_eq!(from_env.bind_addr, default.bind_addr);
        assert_eq!(from_env.default_capacity, default.default_capacity);
        assert_eq!(from_env.default_refill_rate, default.default_refill_rate);
        assert_eq!(from_env.cleanup_interval_secs, default.cleanup_interval_secs);
        assert_eq!(from_env.stale_bucket_max_age_secs, default.stale_bucket_max_age_secs);
        assert_eq!(from_env.short_code_length, default.short_code_length);
        assert_eq!(from_env.max_collision_retries, default.max_collision_retries);
        assert_eq!(from_env.log_level, default.log_level);
        assert_eq!(from_env.enable_tracing, default.enable_tracing);
    }

    #[test]
    fn test_overrides() {
        let mut vars = HashMap::new();
        vars.insert("BIND_ADDR".to_string(), "0.0.0.0:8080".to_string());
        vars.insert("DEFAULT_CAPACITY".to_string(), "20".to_string());
        vars.insert("SHORT_CODE_LENGTH".to_string(), "8".to_string());

        let config = Config::init_from_hashmap(&vars).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.default_bucket_config().unwrap().capacity, 20.0);
        assert_eq!(config.short_code_length, 8);
    }

    #[test]
    fn test_invalid_default_bucket() {
        let config = Config {
            default_refill_rate: 0.0,
            ..Config::default()
        };
        assert!(config.default_bucket_config().is_err());
    }
}
