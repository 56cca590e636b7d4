//! Derives bucket keys for callers of the HTTP API.

use axum::http::HeaderMap;

/// Strategy for generating rate limit keys
#[derive(Debug, Clone, PartialEq)]
pub enum KeyStrategy {
    /// Use client IP address
    IpAddress,
    /// Use API key from header, falling back to the client IP
    ApiKey,
    /// Composite key from multiple sources
    Composite(Vec<KeyStrategy>),
}

/// Generates rate limiting keys based on request context
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    strategy: KeyStrategy,
}

impl KeyGenerator {
    pub fn new(strategy: KeyStrategy) -> Self {
        Self { strategy }
    }

    /// Key for `scope` (for example a route name) and the calling client
    pub fn generate_key(&self, headers: &HeaderMap, client_ip: &str, scope: &str) -> String {
        let identity = Self::identity(&self.strategy, headers, client_ip);
        Self::sanitize_key(&format!("{}:{}", scope, identity))
    }

    fn identity(strategy: &KeyStrategy, headers: &HeaderMap, client_ip: &str) -> String {
        match strategy {
            KeyStrategy::IpAddress => format!("ip:{}", client_ip),
            KeyStrategy::ApiKey => match Self::api_key(headers) {
                Some(api_key) => format!("api:{}", api_key),
                None => format!("ip:{}", client_ip),
            },
            KeyStrategy::Composite(strategies) => strategies
                .iter()
                .map(|s| Self::identity(s, headers, client_ip))
                .collect::<Vec<_>>()
                .join(":"),
        }
    }

    fn api_key(headers: &HeaderMap) -> Option<&str> {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Extract client IP from proxy headers
    pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|xff| xff.split(',').next())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
    }

    /// Replace characters that are not valid in bucket keys
    pub fn sanitize_key(key: &str) -> String {
        key.chars()
            .take(128)
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.' | '@') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(KeyStrategy::IpAddress)
    }
}
