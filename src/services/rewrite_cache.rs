// Rewrite Cache Service
//
// Memoizes rewritten query text keyed by the exact original text.
// Entries carry their own TTL so rarely used queries age out; a miss only
// costs a recompute.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Cache collaborator used by the query rewriter
///
/// Implementations must tolerate concurrent use from several connections.
pub trait RewriteCache: Send + Sync {
    /// Cached rewrite for `key`, if present and not expired
    fn get(&self, key: &str) -> Option<String>;

    /// Store a rewrite that expires after `ttl`
    fn set(&self, key: &str, value: String, ttl: Duration);
}

/// Cached rewrite with metadata
#[derive(Debug, Clone)]
struct CachedRewrite {
    value: String,
    cached_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
    hit_count: u64,
}

impl CachedRewrite {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CachedRewrite>,
    stats: CacheStats,
}

/// In-process rewrite cache with per-entry TTL and LRU eviction
///
/// Shared between connections through an `Arc`. A poisoned lock is recovered
/// rather than propagated: the worst outcome is a stale or missing entry.
pub struct InMemoryRewriteCache {
    state: Mutex<CacheState>,
    max_entries: usize,
}

impl InMemoryRewriteCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the least recently used entry
    fn evict_lru(state: &mut CacheState) {
        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            state.entries.remove(&key);
            state.stats.evictions += 1;
            tracing::debug!("Evicted rewrite cache entry ({} bytes of query text)", key.len());
        }
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        let mut state = self.lock();
        let count = state.entries.len();
        state.entries.clear();
        tracing::info!("Cleared {} rewrite cache entries", count);
    }

    pub fn get_stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    /// Remove expired entries
    pub fn cleanup_expired(&self) {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired());
        let removed = before - state.entries.len();
        state.stats.expirations += removed as u64;

        if removed > 0 {
            tracing::info!("Cleaned up {} expired rewrite cache entries", removed);
        }
    }
}

impl Default for InMemoryRewriteCache {
    fn default() -> Self {
        Self::new(5000)
    }
}

impl RewriteCache for InMemoryRewriteCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.hit_count += 1;
                entry.last_accessed = Instant::now();
                let value = entry.value.clone();
                let hit_count = entry.hit_count;
                state.stats.hits += 1;
                tracing::debug!("Rewrite cache hit (hit_count: {})", hit_count);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
            state.stats.expirations += 1;
            tracing::debug!("Rewrite cache entry expired");
        }
        state.stats.misses += 1;
        None
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut state = self.lock();

        if state.entries.len() >= self.max_entries && !state.entries.contains_key(key) {
            Self::evict_lru(&mut state);
        }

        let now = Instant::now();
        state.entries.insert(
            key.to_string(),
            CachedRewrite {
                value,
                cached_at: now,
                ttl,
                last_accessed: now,
                hit_count: 0,
            },
        );

        tracing::debug!("Cached rewrite (cache size: {})", state.entries.len());
    }
}
