//! In-memory TTL cache for market-wide tables.
//!
//! TWSE publishes its daily tables once per trading day and the attention
//! lists a few times a day, so they are fetched once and served from here.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl_secs: i64) -> Self {
        Self {
            data,
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// String-keyed cache with per-entry expiry.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    default_ttl: i64,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache whose entries live `default_ttl_secs` seconds.
    pub fn new(default_ttl_secs: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl: default_ttl_secs,
        }
    }

    /// Get a cached value if not expired
    pub fn get(&self, key: &str) -> Option<V> {
        let cache = self.entries.read().ok()?;

        cache.get(key).and_then(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.data.clone())
            }
        })
    }

    /// Cache a value with the default TTL
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Cache a value with a custom TTL
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl_secs: i64) {
        if let Ok(mut cache) = self.entries.write() {
            cache.insert(key.into(), CacheEntry::new(value, ttl_secs));
        }
    }

    /// Clear all expired entries
    pub fn clear_expired(&self) {
        if let Ok(mut cache) = self.entries.write() {
            cache.retain(|_, entry| !entry.is_expired());
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let (total, expired) = self
            .entries
            .read()
            .map(|c| (c.len(), c.values().filter(|e| e.is_expired()).count()))
            .unwrap_or((0, 0));

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

/// Key bucket for data refreshed hourly (e.g. "2024051314").
pub fn hourly_key(prefix: &str) -> String {
    format!("{}:{}", prefix, chrono::Local::now().format("%Y%m%d%H"))
}
