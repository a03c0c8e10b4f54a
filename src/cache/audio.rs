//! Byte-budgeted LRU + TTL cache for synthesized audio.
//!
//! [`AudioCache`] maps a [`Fingerprint`] to the audio a backend produced for
//! it. It sits in [`SpeechSynthesizer`](crate::SpeechSynthesizer) in front of
//! the fallback orchestrator, so a hit bypasses rate limiting, health checks
//! and backend calls entirely.
//!
//! # Budget
//!
//! Capacity is measured in bytes of audio, not entries: one long paragraph
//! can weigh as much as hundreds of short acknowledgements. After every
//! [`put`](AudioCache::put) the least-recently-accessed entries are evicted
//! until the total fits the budget again. Entries accessed equally recently
//! leave in insertion order.
//!
//! # Expiry
//!
//! Expiry is lazy: [`try_get`](AudioCache::try_get) treats an entry older
//! than the TTL as a miss and removes it. [`purge_expired`](AudioCache::purge_expired)
//! sweeps the whole cache and is what the optional background sweeper calls.
//!
//! # Failure semantics
//!
//! No operation returns an error. An entry larger than the whole budget is
//! not stored, and any older entry under the same key is removed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;

use super::Fingerprint;
use crate::telemetry;

/// Configuration for the audio cache.
///
/// ```rust
/// # use skald::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_bytes(16 * 1024 * 1024)
///     .ttl(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte budget for all cached audio. Default: 50 MiB.
    pub max_bytes: usize,
    /// Time-to-live measured from insertion. Default: 24 hours.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the byte budget.
    pub fn max_bytes(mut self, n: usize) -> Self {
        self.max_bytes = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A cached synthesis result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub audio: Arc<[u8]>,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub size_bytes: usize,
}

/// Point-in-time counters for the audio cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheState {
    entries: LruCache<Fingerprint, CacheEntry>,
    total_bytes: usize,
}

impl CacheState {
    fn remove(&mut self, key: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }
}

/// In-memory audio cache keyed by request fingerprint.
///
/// Thread-safe; a single mutex guards the recency list and the byte total,
/// which must change together.
pub struct AudioCache {
    state: Mutex<CacheState>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl AudioCache {
    /// Create an empty cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            config: config.clone(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up cached audio.
    ///
    /// A hit refreshes the entry's recency. An expired entry is removed and
    /// reported as a miss.
    pub fn try_get(&self, key: &Fingerprint) -> Option<Arc<[u8]>> {
        let now = Instant::now();
        let mut state = self.state();

        let Some(created_at) = state.entries.peek(key).map(|e| e.created_at) else {
            drop(state);
            self.record_miss();
            return None;
        };

        if now.duration_since(created_at) > self.config.ttl {
            state.remove(key);
            let total = state.total_bytes;
            drop(state);
            debug!(fingerprint = ?key, "cache entry expired");
            metrics::gauge!(telemetry::CACHE_BYTES).set(total as f64);
            self.record_miss();
            return None;
        }

        let audio = state.entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = now;
            Arc::clone(&entry.audio)
        });
        drop(state);
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        audio
    }

    /// Insert or replace audio, then evict least-recently-accessed entries
    /// until the byte budget holds.
    pub fn put(&self, key: Fingerprint, audio: impl Into<Arc<[u8]>>) {
        let audio = audio.into();
        let size = audio.len();
        let now = Instant::now();
        let mut state = self.state();

        if size > self.config.max_bytes {
            // The old value is stale either way.
            state.remove(&key);
            let total = state.total_bytes;
            drop(state);
            debug!(
                fingerprint = ?key,
                size,
                max_bytes = self.config.max_bytes,
                "audio larger than cache budget, not cached"
            );
            metrics::gauge!(telemetry::CACHE_BYTES).set(total as f64);
            return;
        }

        let entry = CacheEntry {
            fingerprint: key,
            audio,
            created_at: now,
            last_accessed_at: now,
            size_bytes: size,
        };
        if let Some((_, old)) = state.entries.push(key, entry) {
            state.total_bytes -= old.size_bytes;
        }
        state.total_bytes += size;

        let mut evicted = 0u64;
        while state.total_bytes > self.config.max_bytes {
            // The new entry is most recent and fits alone, so this terminates
            // before reaching it.
            let Some((victim, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.total_bytes -= entry.size_bytes;
            evicted += 1;
            debug!(fingerprint = ?victim, size = entry.size_bytes, "evicted cache entry");
        }
        let total = state.total_bytes;
        drop(state);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(evicted);
        }
        metrics::gauge!(telemetry::CACHE_BYTES).set(total as f64);
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        let now = Instant::now();
        self.state()
            .entries
            .peek(key)
            .is_some_and(|e| now.duration_since(e.created_at) <= self.config.ttl)
    }

    /// Remove a single entry. Returns whether it existed.
    pub fn remove(&self, key: &Fingerprint) -> bool {
        self.state().remove(key).is_some()
    }

    /// Remove every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.state();
        let count = state.entries.len();
        state.entries.clear();
        state.total_bytes = 0;
        drop(state);
        metrics::gauge!(telemetry::CACHE_BYTES).set(0.0);
        count
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut state = self.state();
        let expired: Vec<Fingerprint> = state
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.created_at) > ttl)
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            state.remove(key);
        }
        let total = state.total_bytes;
        drop(state);
        if !expired.is_empty() {
            debug!(count = expired.len(), "purged expired cache entries");
            metrics::gauge!(telemetry::CACHE_BYTES).set(total as f64);
        }
        expired.len()
    }

    /// Fingerprints from least to most recently accessed.
    pub fn lru_order(&self) -> Vec<Fingerprint> {
        self.state().entries.iter().rev().map(|(k, _)| *k).collect()
    }

    /// Number of entries currently cached (expired ones included until
    /// they are touched or swept).
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of audio currently cached.
    pub fn total_bytes(&self) -> usize {
        self.state().total_bytes
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            max_bytes: self.config.max_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
    }

    // A panic while holding the lock cannot leave the state half-updated
    // in a way later calls would misread, so poisoning is ignored.
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SynthesisSettings;

    fn fp(text: &str) -> Fingerprint {
        Fingerprint::compute(text, "v1", &SynthesisSettings::default())
    }

    fn cache(max_bytes: usize) -> AudioCache {
        AudioCache::new(&CacheConfig::new().max_bytes(max_bytes))
    }

    #[test]
    fn miss_then_hit() {
        let cache = cache(100);
        assert!(cache.try_get(&fp("a")).is_none());
        cache.put(fp("a"), vec![1, 2, 3]);
        assert_eq!(cache.try_get(&fp("a")).as_deref(), Some(&[1u8, 2, 3][..]));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn replace_updates_total() {
        let cache = cache(100);
        cache.put(fp("a"), vec![0; 10]);
        cache.put(fp("a"), vec![0; 4]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 4);
    }

    #[test]
    fn evicts_least_recently_accessed() {
        let cache = cache(30);
        cache.put(fp("a"), vec![0; 10]);
        cache.put(fp("b"), vec![0; 10]);
        cache.put(fp("c"), vec![0; 10]);
        // touch "a" so "b" becomes the oldest
        cache.try_get(&fp("a"));
        cache.put(fp("d"), vec![0; 10]);

        assert!(cache.contains(&fp("a")));
        assert!(!cache.contains(&fp("b")));
        assert!(cache.contains(&fp("c")));
        assert!(cache.contains(&fp("d")));
        assert_eq!(cache.total_bytes(), 30);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn untouched_entries_leave_in_insertion_order() {
        let cache = cache(25);
        cache.put(fp("a"), vec![0; 10]);
        cache.put(fp("b"), vec![0; 10]);
        cache.put(fp("c"), vec![0; 20]);
        assert_eq!(cache.lru_order(), vec![fp("c")]);
    }

    #[test]
    fn oversized_entry_is_dropped_silently() {
        let cache = cache(10);
        cache.put(fp("a"), vec![0; 5]);
        cache.put(fp("big"), vec![0; 11]);
        assert!(!cache.contains(&fp("big")));
        assert!(cache.contains(&fp("a")));
        assert_eq!(cache.total_bytes(), 5);
    }

    #[test]
    fn oversized_replacement_removes_stale_value() {
        let cache = cache(10);
        cache.put(fp("a"), vec![0; 5]);
        cache.put(fp("a"), vec![0; 50]);
        assert!(!cache.contains(&fp("a")));
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn clear_reports_count() {
        let cache = cache(100);
        cache.put(fp("a"), vec![1]);
        cache.put(fp("b"), vec![2]);
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_a_miss() {
        let cache = AudioCache::new(&CacheConfig::new().ttl(Duration::from_secs(60)));
        cache.put(fp("a"), vec![1]);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.try_get(&fp("a")).is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.try_get(&fp("a")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let cache = AudioCache::new(&CacheConfig::new().ttl(Duration::from_secs(60)));
        cache.put(fp("old"), vec![1, 1]);
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.put(fp("new"), vec![2]);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.contains(&fp("new")));
        assert_eq!(cache.total_bytes(), 1);
    }
}
