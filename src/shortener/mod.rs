//! URL shortener.
//!
//! [`UrlShortenerStore`] owns the records; [`ShortCodeGenerator`] turns URLs
//! into codes and resolves hash collisions.

pub mod code;
pub mod store;
pub mod url_validator;

pub use code::{CodeHasher, GeneratedCode, PolynomialHasher, ShortCodeGenerator};
pub use store::{ShortenOptions, ShortenOutcome, ShortenedUrl, UrlShortenerStore};
pub use url_validator::validate_url;
