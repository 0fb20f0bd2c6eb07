// Shared cache backing the session pool
// Process-wide key-value store: the pool keeps its available-count and slot tokens here,
// so the cache (not in-process memory) is the source of truth for pooled sessions

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Missing key: {0}")]
    MissingKey(String),

    #[error("Value stored under {key} is not an integer: {value}")]
    NotAnInteger { key: String, value: String },

    #[error("Counter {key} would overflow")]
    Overflow { key: String },
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub items_count: AtomicUsize,
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub counter_ops: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub counter_ops: usize,
}

// Cache contract the pool relies on
pub trait SharedCache: Send + Sync + 'static {
    // Atomically decrement the integer stored under key and return the new value.
    // Fails if the key is missing or does not hold an integer
    fn decrement(&self, key: &str) -> Result<i64, CacheError>;

    // Atomically increment the integer stored under key and return the new value
    fn increment(&self, key: &str) -> Result<i64, CacheError>;

    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String);

    // Returns true if something was removed
    fn delete(&self, key: &str) -> bool;

    // Fetch `prefix + key` for every key; the result is keyed by the unprefixed key
    // and only contains the keys that were present
    fn get_many(&self, keys: &[String], prefix: &str) -> HashMap<String, String>;

    // Store every `prefix + key` -> value pair
    fn set_many(&self, values: HashMap<String, String>, prefix: &str);

    // Remove every `prefix + key`, returning how many entries existed
    fn delete_many(&self, keys: &[String], prefix: &str) -> usize;

    fn stats(&self) -> CacheStatsReport;
}

pub fn prefixed_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

// In-process implementation. Counter updates run under the shard write lock of the
// entry, so each increment/decrement is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryCache {
    store: DashMap<String, String>,
    stats: CacheStats,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.stats.counter_ops.fetch_add(1, Ordering::SeqCst);

        let mut entry = self
            .store
            .get_mut(key)
            .ok_or_else(|| CacheError::MissingKey(key.to_string()))?;

        let current: i64 = entry.parse().map_err(|_| CacheError::NotAnInteger {
            key: key.to_string(),
            value: entry.clone(),
        })?;

        let updated = current
            .checked_add(delta)
            .ok_or_else(|| CacheError::Overflow {
                key: key.to_string(),
            })?;
        *entry = updated.to_string();
        Ok(updated)
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl SharedCache for MemoryCache {
    fn decrement(&self, key: &str) -> Result<i64, CacheError> {
        self.add(key, -1)
    }

    fn increment(&self, key: &str) -> Result<i64, CacheError> {
        self.add(key, 1)
    }

    fn get(&self, key: &str) -> Option<String> {
        let value = self.store.get(key).map(|v| v.value().clone());
        self.record_lookup(value.is_some());
        value
    }

    fn set(&self, key: &str, value: String) {
        if self.store.insert(key.to_string(), value).is_none() {
            self.stats.items_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn delete(&self, key: &str) -> bool {
        let removed = self.store.remove(key).is_some();
        if removed {
            self.stats.items_count.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    fn get_many(&self, keys: &[String], prefix: &str) -> HashMap<String, String> {
        keys.iter()
            .filter_map(|key| {
                self.get(&prefixed_key(prefix, key))
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }

    fn set_many(&self, values: HashMap<String, String>, prefix: &str) {
        for (key, value) in values {
            self.set(&prefixed_key(prefix, &key), value);
        }
    }

    fn delete_many(&self, keys: &[String], prefix: &str) -> usize {
        keys.iter()
            .filter(|key| self.delete(&prefixed_key(prefix, key)))
            .count()
    }

    fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            items_count: self.stats.items_count.load(Ordering::SeqCst),
            hit_count: self.stats.hit_count.load(Ordering::SeqCst),
            miss_count: self.stats.miss_count.load(Ordering::SeqCst),
            counter_ops: self.stats.counter_ops.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_requires_existing_integer() {
        let cache = MemoryCache::new();

        assert_eq!(
            cache.increment("index_sessions"),
            Err(CacheError::MissingKey("index_sessions".to_string()))
        );

        cache.set("index_sessions", "abc".to_string());
        assert!(matches!(
            cache.decrement("index_sessions"),
            Err(CacheError::NotAnInteger { .. })
        ));

        cache.set("index_sessions", "1".to_string());
        assert_eq!(cache.decrement("index_sessions"), Ok(0));
        assert_eq!(cache.decrement("index_sessions"), Ok(-1));
        assert_eq!(cache.increment("index_sessions"), Ok(0));
        assert_eq!(cache.get("index_sessions").as_deref(), Some("0"));
    }

    #[test]
    fn test_counter_overflow_leaves_value_untouched() {
        let cache = MemoryCache::new();

        cache.set("index_sessions", i64::MAX.to_string());
        assert_eq!(
            cache.increment("index_sessions"),
            Err(CacheError::Overflow {
                key: "index_sessions".to_string()
            })
        );
        assert_eq!(cache.get("index_sessions"), Some(i64::MAX.to_string()));

        cache.set("index_sessions", i64::MIN.to_string());
        assert!(matches!(
            cache.decrement("index_sessions"),
            Err(CacheError::Overflow { .. })
        ));
        assert_eq!(cache.increment("index_sessions"), Ok(i64::MIN + 1));
    }

    #[test]
    fn test_prefixed_bulk_operations() {
        let cache = MemoryCache::new();
        let mut values = HashMap::new();
        values.insert("0".to_string(), "token-a".to_string());
        values.insert("1".to_string(), "token-b".to_string());
        cache.set_many(values, "session_");

        assert_eq!(cache.get("session_0").as_deref(), Some("token-a"));
        assert_eq!(cache.get("0"), None);

        let keys: Vec<String> = (0..3).map(|i| i.to_string()).collect();
        let found = cache.get_many(&keys, "session_");
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("1").map(String::as_str), Some("token-b"));
        assert!(!found.contains_key("2"));

        assert_eq!(cache.delete_many(&keys, "session_"), 2);
        assert_eq!(cache.delete_many(&keys, "session_"), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_counter_updates_are_not_lost() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("counter", "0".to_string());

        let threads_count = 8;
        let operations_per_thread = 500;

        let handles: Vec<_> = (0..threads_count)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..operations_per_thread {
                        if i % 2 == 0 {
                            cache.increment("counter").unwrap();
                        } else {
                            cache.decrement("counter").unwrap();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.get("counter").as_deref(), Some("0"));
        let stats = cache.stats();
        assert_eq!(stats.counter_ops, threads_count * operations_per_thread);
        assert_eq!(stats.items_count, 1);
    }
}
