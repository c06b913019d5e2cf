// ============================================
// Score Cache
// ============================================
//
// Process-local read-through cache for expensive intermediate ranking
// results, keyed by composite fingerprints. TTL expiry is passive
// (checked on read); purge_expired exists so a background sweeper can
// be added without changing the design.
//
// A cache failure of any kind is indistinguishable from a miss and
// never propagates as a ranking error.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CachedEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    #[inline]
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Concurrent TTL cache over a DashMap store.
pub struct ScoreCache<V> {
    store: DashMap<String, CachedEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> ScoreCache<V> {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch a value. An expired entry is removed on observation and
    /// counts as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.store.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Score cache HIT");
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.store.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Score cache MISS");
        None
    }

    pub fn insert(&self, key: String, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.store.insert(key, CachedEntry::new(value, ttl));
    }

    /// Read-through helper: returns `(value, was_hit)`.
    pub fn get_or_insert_with(
        &self,
        key: &str,
        ttl: Duration,
        compute: impl FnOnce() -> V,
    ) -> (V, bool) {
        if let Some(value) = self.get(key) {
            return (value, true);
        }
        let value = compute();
        self.insert(key.to_string(), value.clone(), ttl);
        (value, false)
    }

    /// Drop every expired entry; returns how many were removed. Safe to
    /// call from a periodic sweeper task.
    pub fn purge_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.store.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Purged expired score cache entries");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.store.len(),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl<V: Clone> Default for ScoreCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Composite fingerprint key: discriminator segments joined with `:`.
/// Keys are opaque to consumers; distinct discriminators yield distinct
/// keys as long as segments themselves contain no `:` (ids and enum
/// names here never do).
pub fn composite_key(segments: &[&str]) -> String {
    segments.join(":")
}
