use super::code::{normalize_alias, ShortCodeGenerator};
use super::url_validator::validate_url;
use crate::error::ShortenerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// A stored short link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortenedUrl {
    pub id: Uuid,
    pub original_url: String,
    pub short_code: String,
    pub created_at: DateTime<Utc>,
    pub click_count: u64,
    pub custom_alias: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShortenOptions {
    pub custom_alias: Option<String>,
}

impl ShortenOptions {
    pub fn with_alias(alias: impl Into<String>) -> Self {
        Self {
            custom_alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortenOutcome {
    pub record: ShortenedUrl,
    pub collision_resolved: bool,
    /// `false` when the URL was already stored and the existing record was returned.
    pub created: bool,
}

/// The three lookups over the same records. Kept consistent by only ever
/// changing them through `insert` and `remove_code`.
#[derive(Debug, Default)]
struct Indices {
    by_id: HashMap<Uuid, ShortenedUrl>,
    by_code: HashMap<String, Uuid>,
    by_url: HashMap<String, String>,
}

impl Indices {
    fn record_for_code(&self, code: &str) -> Option<&ShortenedUrl> {
        self.by_code.get(code).and_then(|id| self.by_id.get(id))
    }

    fn record_for_url(&self, url: &str) -> Option<&ShortenedUrl> {
        self.by_url
            .get(url)
            .and_then(|code| self.record_for_code(code))
    }

    /// All three entries go in or none do.
    fn insert(&mut self, record: ShortenedUrl) -> Result<(), ShortenerError> {
        if self.by_code.contains_key(&record.short_code) {
            return Err(ShortenerError::AliasCollision(record.short_code));
        }
        if self.by_url.contains_key(&record.original_url) || self.by_id.contains_key(&record.id) {
            return Err(ShortenerError::Internal(format!(
                "index entry for '{}' already present",
                record.short_code
            )));
        }

        self.by_code.insert(record.short_code.clone(), record.id);
        self.by_url
            .insert(record.original_url.clone(), record.short_code.clone());
        self.by_id.insert(record.id, record);
        Ok(())
    }

    fn remove_code(&mut self, code: &str) -> Option<ShortenedUrl> {
        let id = self.by_code.remove(code)?;
        let record = self.by_id.remove(&id)?;
        if self.by_url.get(&record.original_url).map(String::as_str) == Some(code) {
            self.by_url.remove(&record.original_url);
        }
        Some(record)
    }
}

/// In-memory URL shortener.
///
/// A single lock covers all three indices, which is what makes inserts and
/// deletes atomic across them.
#[derive(Debug, Default)]
pub struct UrlShortenerStore {
    generator: ShortCodeGenerator,
    indices: RwLock<Indices>,
}

impl UrlShortenerStore {
    pub fn new(generator: ShortCodeGenerator) -> Self {
        Self {
            generator,
            indices: RwLock::new(Indices::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Indices>, ShortenerError> {
        self.indices
            .read()
            .map_err(|_| ShortenerError::Internal("Failed to acquire read lock on links".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Indices>, ShortenerError> {
        self.indices
            .write()
            .map_err(|_| ShortenerError::Internal("Failed to acquire write lock on links".to_string()))
    }

    /// Stores `url` under a new short code, or returns its existing record.
    ///
    /// An already stored URL is returned as is, even when `options` carries a
    /// different alias. A custom alias is used verbatim after normalization and
    /// fails with `AliasCollision` if taken; generated codes go through the
    /// collision ladder instead.
    pub fn shorten(
        &self,
        url: &str,
        options: &ShortenOptions,
    ) -> Result<ShortenOutcome, ShortenerError> {
        let url = validate_url(url)?;
        let alias = options
            .custom_alias
            .as_deref()
            .map(normalize_alias)
            .transpose()?;

        let mut indices = self.write()?;

        if let Some(existing) = indices.record_for_url(url) {
            debug!(url = %url, code = %existing.short_code, "URL already shortened");
            return Ok(ShortenOutcome {
                record: existing.clone(),
                collision_resolved: false,
                created: false,
            });
        }

        let custom_alias = alias.is_some();
        let (short_code, collision_resolved) = match alias {
            Some(alias) => {
                if indices.by_code.contains_key(&alias) {
                    return Err(ShortenerError::AliasCollision(alias));
                }
                (alias, false)
            }
            None => {
                let generated = self
                    .generator
                    .resolve(url, |code| indices.by_code.contains_key(code))?;
                (generated.code, generated.collision_resolved)
            }
        };

        let record = ShortenedUrl {
            id: Uuid::new_v4(),
            original_url: url.to_string(),
            short_code,
            created_at: Utc::now(),
            click_count: 0,
            custom_alias,
        };
        indices.insert(record.clone())?;

        info!(
            code = %record.short_code,
            url = %record.original_url,
            collision_resolved,
            "Created short link"
        );
        Ok(ShortenOutcome {
            record,
            collision_resolved,
            created: true,
        })
    }

    /// Returns the original URL for `code` and counts the click.
    pub fn expand(&self, code: &str) -> Result<String, ShortenerError> {
        let mut indices = self.write()?;
        let id = *indices
            .by_code
            .get(code)
            .ok_or_else(|| ShortenerError::NotFound(code.to_string()))?;
        let record = indices.by_id.get_mut(&id).ok_or_else(|| {
            ShortenerError::Internal(format!("code '{}' points at a missing record", code))
        })?;

        record.click_count += 1;
        Ok(record.original_url.clone())
    }

    pub fn get_stats(&self, code: &str) -> Result<Option<ShortenedUrl>, ShortenerError> {
        Ok(self.read()?.record_for_code(code).cloned())
    }

    /// Removes `code` from every index. Returns `false` if it was not stored.
    pub fn delete(&self, code: &str) -> Result<bool, ShortenerError> {
        let removed = self.write()?.remove_code(code);
        if let Some(record) = &removed {
            info!(code = %code, url = %record.original_url, "Deleted short link");
        }
        Ok(removed.is_some())
    }

    /// Every record, oldest first.
    pub fn list_all(&self) -> Result<Vec<ShortenedUrl>, ShortenerError> {
        let mut records: Vec<ShortenedUrl> = self.read()?.by_id.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.short_code.cmp(&b.short_code))
        });
        Ok(records)
    }

    pub fn len(&self) -> Result<usize, ShortenerError> {
        Ok(self.read()?.by_id.len())
    }

    pub fn is_empty(&self) -> Result<bool, ShortenerError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shortener::code::CodeHasher;
    use std::sync::Arc;

    /// Every input hashes the same.
    #[derive(Debug)]
    struct ConstantHasher;

    impl CodeHasher for ConstantHasher {
        fn hash(&self, _input: &str) -> u32 {
            7
        }
    }

    /// Inputs of equal length collide.
    #[derive(Debug)]
    struct LengthHasher;

    impl CodeHasher for LengthHasher {
        fn hash(&self, input: &str) -> u32 {
            input.len() as u32
        }
    }

    fn store_with(hasher: Arc<dyn CodeHasher>) -> UrlShortenerStore {
        UrlShortenerStore::new(ShortCodeGenerator::default().with_hasher(hasher))
    }

    #[test]
    fn test_shorten_and_expand() {
        let store = UrlShortenerStore::default();
        let outcome = store
            .shorten("https://example.com/a", &ShortenOptions::default())
            .unwrap();

        assert!(outcome.created);
        assert!(!outcome.collision_resolved);
        assert_eq!(outcome.record.short_code.len(), 6);
        assert_eq!(outcome.record.click_count, 0);

        let code = outcome.record.short_code;
        assert_eq!(store.expand(&code).unwrap(), "https://example.com/a");
        assert_eq!(store.expand(&code).unwrap(), "https://example.com/a");
        assert_eq!(store.get_stats(&code).unwrap().unwrap().click_count, 2);
    }

    #[test]
    fn test_idempotent_shortening() {
        let store = UrlShortenerStore::default();
        let first = store
            .shorten("https://example.com/a", &ShortenOptions::default())
            .unwrap();
        let second = store
            .shorten("https://example.com/a", &ShortenOptions::default())
            .unwrap();

        assert!(!second.created);
        assert_eq!(first.record.short_code, second.record.short_code);
        assert_eq!(first.record.id, second.record.id);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_existing_url_wins_over_new_alias() {
        let store = UrlShortenerStore::default();
        let first = store
            .shorten("https://example.com/a", &ShortenOptions::default())
            .unwrap();
        let second = store
            .shorten("https://example.com/a", &ShortenOptions::with_alias("docs"))
            .unwrap();

        assert_eq!(second.record.short_code, first.record.short_code);
        assert_eq!(store.get_stats("docs").unwrap(), None);
    }

    #[test]
    fn test_custom_alias_exclusivity() {
        let store = UrlShortenerStore::default();
        let first = store
            .shorten("https://example.com/a", &ShortenOptions::with_alias("Docs!"))
            .unwrap();
        assert_eq!(first.record.short_code, "docs");
        assert!(first.record.custom_alias);

        let second = store.shorten("https://example.com/b", &ShortenOptions::with_alias("docs"));
        assert_eq!(
            second,
            Err(ShortenerError::AliasCollision("docs".to_string()))
        );

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get_stats("docs").unwrap().unwrap(), first.record);
        assert_eq!(store.expand("docs").unwrap(), "https://example.com/a");
    }

    #[test]
    fn test_hash_collision_is_resolved() {
        let store = store_with(Arc::new(LengthHasher));
        let a = store
            .shorten("https://a.example/x", &ShortenOptions::default())
            .unwrap();
        let b = store
            .shorten("https://b.example/x", &ShortenOptions::default())
            .unwrap();

        assert!(!a.collision_resolved);
        assert!(b.collision_resolved);
        assert_ne!(a.record.short_code, b.record.short_code);
        assert_eq!(store.expand(&a.record.short_code).unwrap(), "https://a.example/x");
        assert_eq!(store.expand(&b.record.short_code).unwrap(), "https://b.example/x");
    }

    #[test]
    fn test_collision_resolution_failure_leaves_no_state() {
        let store = store_with(Arc::new(ConstantHasher));
        store
            .shorten("https://a.example", &ShortenOptions::default())
            .unwrap();

        let result = store.shorten("https://b.example", &ShortenOptions::default());
        assert_eq!(
            result,
            Err(ShortenerError::CollisionResolutionFailed { attempts: 5 })
        );
        assert_eq!(store.len().unwrap(), 1);

        // A custom alias is the caller's way out.
        let aliased = store
            .shorten("https://b.example", &ShortenOptions::with_alias("bee"))
            .unwrap();
        assert_eq!(aliased.record.short_code, "bee");
    }

    #[test]
    fn test_invalid_input_rejected_before_mutation() {
        let store = UrlShortenerStore::default();
        assert!(matches!(
            store.shorten("not a url", &ShortenOptions::default()),
            Err(ShortenerError::InvalidUrl(_))
        ));
        assert!(matches!(
            store.shorten("https://example.com", &ShortenOptions::with_alias("?")),
            Err(ShortenerError::InvalidAlias(_))
        ));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_delete_then_expand() {
        let store = UrlShortenerStore::default();
        let first = store
            .shorten("https://example.com/a", &ShortenOptions::default())
            .unwrap();
        let code = first.record.short_code.clone();
        store.expand(&code).unwrap();

        assert!(store.delete(&code).unwrap());
        assert!(!store.delete(&code).unwrap());
        assert_eq!(
            store.expand(&code),
            Err(ShortenerError::NotFound(code.clone()))
        );
        assert_eq!(store.get_stats(&code).unwrap(), None);

        let again = store
            .shorten("https://example.com/a", &ShortenOptions::default())
            .unwrap();
        assert!(again.created);
        assert_ne!(again.record.id, first.record.id);
        assert_eq!(again.record.click_count, 0);
    }

    #[test]
    fn test_list_all() {
        let store = UrlShortenerStore::default();
        for i in 0..5 {
            store
                .shorten(&format!("https://example.com/{}", i), &ShortenOptions::default())
                .unwrap();
        }

        let records = store.list_all().unwrap();
        assert_eq!(records.len(), 5);
        assert!(records
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at));
    }

    #[test]
    fn test_concurrent_shortening_of_one_url() {
        let store = Arc::new(UrlShortenerStore::default());

        let codes: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let store = Arc::clone(&store);
                    scope.spawn(move || {
                        store
                            .shorten("https://example.com/hot", &ShortenOptions::default())
                            .unwrap()
                            .record
                            .short_code
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(codes.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(store.len().unwrap(), 1);
    }
}
