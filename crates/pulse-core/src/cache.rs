//! TTL cache for derived aggregates (leaderboards, daily series).
//!
//! All entries live in one namespace behind one mutex. Any write to the
//! ingestion store clears the whole namespace: a narrow key must never outlive
//! a broad aggregate computed from the same rows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Snapshot of cache contents for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub ttl: Duration,
    pub keys: Vec<String>,
}

/// Thread-safe TTL cache. Clones share the same namespace.
#[derive(Debug, Clone)]
pub struct AggregateCache<V> {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, CacheEntry<V>>>>,
}

impl<V: Clone> AggregateCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned cache mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the value if it is younger than the TTL. Expired entries are
    /// removed on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock_entries();
        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
        };

        if expired {
            entries.remove(key);
            tracing::debug!(%key, "Cache expired");
            return None;
        }

        tracing::debug!(%key, "Cache hit");
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        tracing::debug!(%key, "Cache set");
        self.lock_entries().insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        let mut entries = self.lock_entries();
        let dropped = entries.len();
        entries.clear();
        tracing::debug!(dropped, "Cache invalidated");
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock_entries();
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        CacheStats {
            size: entries.len(),
            ttl: self.ttl,
            keys,
        }
    }
}
