//! Embedding cache keyed by content hash.
//!
//! Query embedding and relevance pruning re-embed the same short texts
//! constantly; caching them avoids both cost and latency. Eviction is
//! least-recently-used by access time.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Instant;

/// Cache sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached vectors
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 4096 }
    }
}

#[derive(Debug)]
struct CacheEntry {
    embedding: Vec<f32>,
    last_accessed: Instant,
}

/// In-process embedding cache
#[derive(Debug)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<u64, CacheEntry>>,
    config: CacheConfig,
    stats: RwLock<(usize, usize)>, // (hits, misses)
}

impl EmbeddingCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            stats: RwLock::new((0, 0)),
        }
    }

    /// Cache key for a text under a model handle
    #[must_use]
    pub fn key(model: &str, text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        model.hash(&mut hasher);
        text.hash(&mut hasher);
        hasher.finish()
    }

    /// Fetch a cached embedding
    #[must_use]
    pub fn get(&self, key: u64) -> Option<Vec<f32>> {
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();
        if let Some(entry) = entries.get_mut(&key) {
            entry.last_accessed = Instant::now();
            stats.0 += 1;
            Some(entry.embedding.clone())
        } else {
            stats.1 += 1;
            None
        }
    }

    /// Insert an embedding, evicting the least recently used entry when full
    pub fn put(&self, key: u64, embedding: Vec<f32>) {
        let mut entries = self.entries.write();
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| *k)
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                embedding,
                last_accessed: Instant::now(),
            },
        );
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// `(hits, misses, hit_rate)`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> (usize, usize, f64) {
        let (hits, misses) = *self.stats.read();
        let total = hits + misses;
        let rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        (hits, misses, rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss_accounting() {
        let cache = EmbeddingCache::new(CacheConfig::default());
        let key = EmbeddingCache::key("m", "text");
        assert!(cache.get(key).is_none());
        cache.put(key, vec![1.0, 2.0]);
        assert_eq!(cache.get(key).unwrap(), vec![1.0, 2.0]);
        let (hits, misses, rate) = cache.stats();
        assert_eq!((hits, misses), (1, 1));
        assert!((rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn eviction_respects_capacity() {
        let cache = EmbeddingCache::new(CacheConfig { max_entries: 2 });
        cache.put(1, vec![1.0]);
        cache.put(2, vec![2.0]);
        // touch 1 so 2 becomes the eviction candidate
        let _ = cache.get(1);
        cache.put(3, vec![3.0]);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn keys_differ_by_model() {
        assert_ne!(
            EmbeddingCache::key("model-a", "same"),
            EmbeddingCache::key("model-b", "same")
        );
    }
}
