//! Bounded in-memory translation memo with strict FIFO eviction.
//! Key: blake3 hash of (src_lang | tgt_lang | trimmed source text).
//!
//! Backed by `LruCache`, but never promoted: reads use `peek` and putting an
//! existing key is a no-op, so recency order equals insertion order.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

/// Default bound on cached entries.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn compute(src_lang: &str, tgt_lang: &str, text: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(src_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(tgt_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

pub struct TranslationCache {
    inner: Mutex<LruCache<CacheKey, String>>,
}

impl TranslationCache {
    /// A zero capacity is clamped to one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.inner.lock().peek(key).cloned()
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.inner.lock().contains(key)
    }

    /// Insert a new entry, evicting the oldest-inserted one when full.
    /// Entries are immutable: an existing key keeps its value and position.
    pub fn put(&self, key: CacheKey, translated_text: String) {
        let mut cache = self.inner.lock();
        if cache.contains(&key) {
            return;
        }
        if let Some((_evicted, _)) = cache.push(key, translated_text) {
            debug!(len = cache.len(), "cache_evicted_oldest");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: usize) -> CacheKey {
        CacheKey::compute("auto", "zh", &format!("text {i}"))
    }

    #[test]
    fn overflow_evicts_exactly_the_first_inserted() {
        let cache = TranslationCache::new(DEFAULT_CAPACITY);
        for i in 0..=DEFAULT_CAPACITY {
            cache.put(key(i), format!("t{i}"));
        }
        assert_eq!(cache.len(), DEFAULT_CAPACITY);
        assert!(!cache.has(&key(0)));
        for i in 1..=DEFAULT_CAPACITY {
            assert!(cache.has(&key(i)), "key {i} should survive");
        }
    }

    #[test]
    fn reads_do_not_refresh_position() {
        let cache = TranslationCache::new(2);
        cache.put(key(0), "a".into());
        cache.put(key(1), "b".into());
        assert_eq!(cache.get(&key(0)).as_deref(), Some("a"));
        cache.put(key(2), "c".into());
        assert!(!cache.has(&key(0)));
        assert!(cache.has(&key(1)));
    }

    #[test]
    fn re_put_keeps_value_and_order() {
        let cache = TranslationCache::new(2);
        cache.put(key(0), "a".into());
        cache.put(key(1), "b".into());
        cache.put(key(0), "changed".into());
        assert_eq!(cache.get(&key(0)).as_deref(), Some("a"));
        cache.put(key(2), "c".into());
        assert!(!cache.has(&key(0)));
    }

    #[test]
    fn key_depends_on_language_pair() {
        assert_ne!(
            CacheKey::compute("auto", "zh", "hello"),
            CacheKey::compute("auto", "en", "hello")
        );
        assert_eq!(
            CacheKey::compute("auto", "zh", "hello"),
            CacheKey::compute("auto", "zh", "hello")
        );
    }
}
