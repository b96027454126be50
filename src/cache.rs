//! Compiled-query cache.
//!
//! Entries are keyed by the raw query text scoped to the requesting user and
//! shared as `Arc<CompiledQuery>`. Concurrent misses for the same key may
//! both compile; the last write wins. Schema changes drop every entry whose
//! dependency set names the changed object.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::CacheConfig;
use crate::soql::CompiledQuery;

/// Cache of compiled queries.
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    /// Logical clock for LRU ordering
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct CacheEntry {
    compiled: Arc<CompiledQuery>,
    last_access: u64,
}

impl QueryCache {
    /// Create a cache holding at most `max_entries` queries. Zero disables caching.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(max_entries.min(4_096)),
            max_entries,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries)
    }

    /// Key for `text` as seen by `user_id`.
    pub fn key(user_id: &str, text: &str) -> String {
        format!("{}\u{0}{}", user_id, text)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &str) -> Option<Arc<CompiledQuery>> {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.last_access = self.tick();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.compiled))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, compiled: Arc<CompiledQuery>) {
        if self.max_entries == 0 {
            return;
        }
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            CacheEntry {
                compiled,
                last_access: self.tick(),
            },
        );
    }

    /// Returns whether an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every entry matching `predicate`; returns how many were removed.
    pub fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str, &CompiledQuery) -> bool,
    {
        let before = self.entries.len();
        self.entries
            .retain(|key, entry| !predicate(key, &entry.compiled));
        before.saturating_sub(self.entries.len())
    }

    /// Drop every query that touches `api_name`.
    pub fn invalidate_object(&self, api_name: &str) -> usize {
        let removed = self.remove_where(|_, compiled| {
            compiled
                .dependencies
                .iter()
                .any(|dep| dep.eq_ignore_ascii_case(api_name))
        });
        tracing::debug!(
            "[SOQL cache] Invalidated {} entries depending on {}",
            removed,
            api_name
        );
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_access)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AllowAll, QueryContext};
    use crate::config::Limits;
    use crate::soql::fixtures::catalog;
    use crate::soql::{compile, parse, Validator};

    fn compiled(text: &str) -> Arc<CompiledQuery> {
        let metadata = catalog();
        let ctx = QueryContext::new("u1");
        let limits = Limits::default();
        let validated = Validator::new(&metadata, &AllowAll, &ctx, &limits)
            .validate(parse(text).unwrap())
            .unwrap();
        Arc::new(compile(&validated).unwrap())
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = QueryCache::new(10);
        let key = QueryCache::key("u1", "SELECT Id FROM Account");

        assert!(cache.get(&key).is_none());
        cache.set(key.clone(), compiled("SELECT Id FROM Account"));
        assert!(cache.get(&key).is_some());
        assert!(cache.get(&QueryCache::key("u2", "SELECT Id FROM Account")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate() - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = QueryCache::new(2);
        cache.set("a", compiled("SELECT Id FROM Account"));
        cache.set("b", compiled("SELECT Id FROM Contact"));
        assert!(cache.get("a").is_some());

        cache.set("c", compiled("SELECT Id FROM User"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());

        // Overwriting an existing key does not evict
        cache.set("c", compiled("SELECT Name FROM User"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_object() {
        let cache = QueryCache::new(10);
        cache.set("contact", compiled("SELECT Account.Name FROM Contact"));
        cache.set("account", compiled("SELECT Name FROM Account"));
        cache.set("user", compiled("SELECT Name FROM User"));

        assert_eq!(cache.invalidate_object("account"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("user").is_some());
    }

    #[test]
    fn test_delete_clear_and_remove_where() {
        let cache = QueryCache::new(10);
        cache.set("a", compiled("SELECT Id FROM Account"));
        cache.set("b", compiled("SELECT Id FROM Account FOR UPDATE"));

        assert_eq!(cache.remove_where(|_, c| c.for_update), 1);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert!(cache.is_empty());

        cache.set("a", compiled("SELECT Id FROM Account"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = QueryCache::new(0);
        cache.set("a", compiled("SELECT Id FROM Account"));
        assert!(cache.is_empty());
    }
}
