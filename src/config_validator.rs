use crate::config::Config;
use crate::error::ConfigError;
use crate::shortener::code::{MAX_CODE_LENGTH, MIN_CODE_LENGTH};
use crate::token_bucket::BucketConfig;
use std::net::SocketAddr;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a bind address
    pub fn validate_bind_address(address: &SocketAddr) -> Result<(), ConfigError> {
        if address.port() == 0 {
            return Err(ConfigError::Invalid(
                "Bind address must name a fixed port".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates default bucket parameters
    pub fn validate_rate_limit(capacity: f64, refill_rate: f64) -> Result<(), ConfigError> {
        BucketConfig::new(capacity, refill_rate)
            .map(|_| ())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Validates shortener parameters
    pub fn validate_shortener(code_length: usize, max_retries: u32) -> Result<(), ConfigError> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code_length) {
            return Err(ConfigError::Invalid(format!(
                "Short code length must be between {} and {}",
                MIN_CODE_LENGTH, MAX_CODE_LENGTH
            )));
        }

        if max_retries == 0 {
            return Err(ConfigError::Invalid(
                "Collision retries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates sweep timing
    pub fn validate_cleanup(interval_secs: u64, max_age_secs: u64) -> Result<(), ConfigError> {
        if interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "Cleanup interval must be greater than 0".to_string(),
            ));
        }

        if max_age_secs == 0 {
            return Err(ConfigError::Invalid(
                "Stale bucket age must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates log level name
    pub fn validate_log_level(level: &str) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, valid_levels
            )));
        }

        Ok(())
    }

    /// Validates a complete service configuration
    pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
        Self::validate_bind_address(&config.bind_addr)?;
        Self::validate_rate_limit(config.default_capacity, config.default_refill_rate)?;
        Self::validate_shortener(config.short_code_length, config.max_collision_retries)?;
        Self::validate_cleanup(config.cleanup_interval_secs, config.stale_bucket_max_age_secs)?;
        Self::validate_log_level(&config.log_level)?;

        Ok(())
    }
}
