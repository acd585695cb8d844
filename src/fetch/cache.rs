use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use sha2::{Digest, Sha256};

use crate::feed::ParsedFeed;

/// URL-keyed memo of successfully parsed feeds.
///
/// Entries live for the whole process: there is no TTL and no eviction, and
/// a hit always wins over a network fetch regardless of age. Keys are the
/// SHA-256 hex digest of the URL so arbitrary URL lengths and charsets map
/// to a fixed-size key.
///
/// A disabled cache reports every lookup as a miss and drops every insert.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Option<Mutex<HashMap<String, ParsedFeed>>>,
}

impl ResponseCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: enabled.then(|| Mutex::new(HashMap::new())),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Stable cache key for a URL.
    pub fn key(url: &str) -> String {
        format!("{:x}", Sha256::digest(url.as_bytes()))
    }

    pub fn get(&self, url: &str) -> Option<ParsedFeed> {
        let entries = self.entries.as_ref()?;
        lock(entries).get(&Self::key(url)).cloned()
    }

    pub fn put(&self, url: &str, feed: ParsedFeed) {
        if let Some(entries) = &self.entries {
            lock(entries).insert(Self::key(url), feed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| lock(e).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A panic while holding the lock cannot leave a HashMap half-written, so a
// poisoned lock is still safe to use.
fn lock(entries: &Mutex<HashMap<String, ParsedFeed>>) -> MutexGuard<'_, HashMap<String, ParsedFeed>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedParser, FeedRsParser};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn sample_feed(title: &str) -> ParsedFeed {
        let rss = format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title></channel></rss>"#
        );
        FeedRsParser.parse(rss.as_bytes()).unwrap()
    }

    #[test]
    fn test_put_then_get_returns_document() {
        let cache = ResponseCache::new(true);
        let feed = sample_feed("Cached");
        cache.put("https://example.com/feed", feed.clone());

        let hit = cache.get("https://example.com/feed").unwrap();
        assert!(Arc::ptr_eq(&hit.document, &feed.document));
        assert_eq!(hit.title(), Some("Cached"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_miss_for_unknown_url() {
        let cache = ResponseCache::new(true);
        cache.put("https://example.com/a", sample_feed("A"));
        assert!(cache.get("https://example.com/b").is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let cache = ResponseCache::new(true);
        cache.put("https://example.com/feed", sample_feed("Old"));
        cache.put("https://example.com/feed", sample_feed("New"));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("https://example.com/feed").unwrap().title(),
            Some("New")
        );
    }

    #[test]
    fn test_disabled_cache_always_misses() {
        let cache = ResponseCache::disabled();
        cache.put("https://example.com/feed", sample_feed("Ignored"));
        assert!(!cache.is_enabled());
        assert!(cache.get("https://example.com/feed").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_is_sha256_hex() {
        let key = ResponseCache::key("https://example.com/feed");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn prop_key_stable_and_fixed_length(url in ".{0,300}") {
            let a = ResponseCache::key(&url);
            let b = ResponseCache::key(&url);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), 64);
        }

        #[test]
        fn prop_distinct_urls_distinct_keys(a in "[a-z]{1,20}", b in "[a-z]{1,20}") {
            prop_assume!(a != b);
            prop_assert_ne!(ResponseCache::key(&a), ResponseCache::key(&b));
        }
    }
}
