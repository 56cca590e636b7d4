//! Short code generation.
//!
//! Codes are a 32-bit hash of the URL written in base62. The hash is not
//! unique, so [`ShortCodeGenerator::resolve`] walks a bounded ladder of
//! salted hashes until it finds a free code.

use crate::error::ShortenerError;
use regex::Regex;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

pub const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const MIN_CODE_LENGTH: usize = 2;
pub const MAX_CODE_LENGTH: usize = 20;

static ALIAS_DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_-]").expect("alias pattern is valid"));

/// 32-bit hash used to derive short codes.
pub trait CodeHasher: Send + Sync + Debug {
    fn hash(&self, input: &str) -> u32;
}

/// `h = h * 31 + c` over the input's characters, wrapping on overflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolynomialHasher;

impl CodeHasher for PolynomialHasher {
    fn hash(&self, input: &str) -> u32 {
        input
            .chars()
            .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
    }
}

/// Writes `value` in base62, left-padded with `0` to `length` characters.
/// Longer encodings keep their lowest `length` digits.
pub fn encode_base62(mut value: u64, length: usize) -> String {
    let mut digits = Vec::with_capacity(length.max(11));
    while value > 0 {
        digits.push(BASE62_ALPHABET[(value % 62) as usize]);
        value /= 62;
    }
    digits.truncate(length);
    digits.resize(length, b'0');
    digits.reverse();

    digits.into_iter().map(char::from).collect()
}

/// A code picked by [`ShortCodeGenerator::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub code: String,
    /// Whether the first candidate was taken and a salted retry won.
    pub collision_resolved: bool,
}

#[derive(Debug, Clone)]
pub struct ShortCodeGenerator {
    hasher: Arc<dyn CodeHasher>,
    code_length: usize,
    max_retries: u32,
}

impl Default for ShortCodeGenerator {
    fn default() -> Self {
        Self {
            hasher: Arc::new(PolynomialHasher),
            code_length: DEFAULT_CODE_LENGTH,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ShortCodeGenerator {
    pub fn new(code_length: usize, max_retries: u32) -> Result<Self, ShortenerError> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code_length) {
            return Err(ShortenerError::InvalidConfiguration(format!(
                "code length must be within {}..={}, got {}",
                MIN_CODE_LENGTH, MAX_CODE_LENGTH, code_length
            )));
        }

        Ok(Self {
            code_length,
            max_retries,
            ..Self::default()
        })
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn CodeHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn code_length(&self) -> usize {
        self.code_length
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The deterministic first-choice code for `input`.
    pub fn generate(&self, input: &str) -> String {
        encode_base62(self.hasher.hash(input) as u64, self.code_length)
    }

    /// Finds a code for `url` that `is_taken` rejects neither as the first
    /// choice nor on one of `max_retries` salted attempts.
    pub fn resolve<F>(&self, url: &str, is_taken: F) -> Result<GeneratedCode, ShortenerError>
    where
        F: Fn(&str) -> bool,
    {
        let code = self.generate(url);
        if !is_taken(&code) {
            return Ok(GeneratedCode {
                code,
                collision_resolved: false,
            });
        }

        debug!(url = %url, code = %code, "Short code collision, retrying with salt");

        for attempt in 1..=self.max_retries {
            let candidate = self.generate(&format!("{}{}", url, attempt));
            if !is_taken(&candidate) {
                debug!(url = %url, code = %candidate, attempt, "Collision resolved");
                return Ok(GeneratedCode {
                    code: candidate,
                    collision_resolved: true,
                });
            }
        }

        warn!(url = %url, attempts = self.max_retries, "Could not resolve short code collision");
        Err(ShortenerError::CollisionResolutionFailed {
            attempts: self.max_retries,
        })
    }
}

/// Lowercases `alias`, drops characters outside `[a-z0-9_-]` and caps the
/// length at [`MAX_CODE_LENGTH`].
pub fn normalize_alias(alias: &str) -> Result<String, ShortenerError> {
    let lowered = alias.trim().to_lowercase();
    let mut normalized = ALIAS_DISALLOWED.replace_all(&lowered, "").into_owned();
    normalized.truncate(MAX_CODE_LENGTH);

    if normalized.len() < MIN_CODE_LENGTH {
        return Err(ShortenerError::InvalidAlias(format!(
            "'{}' must contain at least {} of [a-z0-9_-]",
            alias, MIN_CODE_LENGTH
        )));
    }
    Ok(normalized)
}
