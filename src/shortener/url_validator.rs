use crate::error::ShortenerError;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;

pub const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ftp", "mailto"];

/// Checks that `raw` is an absolute URL with an allowed scheme and returns it
/// trimmed. Nothing is stored or rewritten beyond the trim.
pub fn validate_url(raw: &str) -> Result<&str, ShortenerError> {
    let url = raw.trim();

    if url.is_empty() {
        return Err(ShortenerError::InvalidUrl("URL cannot be empty".to_string()));
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(ShortenerError::UrlTooLong {
            length: url.len(),
            max: MAX_URL_LENGTH,
        });
    }

    let parsed = Url::parse(url).map_err(|e| ShortenerError::InvalidUrl(e.to_string()))?;

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(ShortenerError::InvalidUrl(format!(
            "scheme '{}' is not allowed, expected one of {:?}",
            parsed.scheme(),
            ALLOWED_SCHEMES
        )));
    }

    Ok(url)
}
