//! Short-lived memoization of per-dataset results.
//!
//! Caches are injected into [`crate::LakeService`] rather than living in module
//! statics, so tests can clear them or swap in [`NoCache`]. Only results derived
//! from immutable dataset versions are cached; simulation state never is.

use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

/// A clearable key/value cache shared between request threads.
pub trait ResultCache<K, V>: Send + Sync {
    /// Cached value, if present and not expired.
    fn get(&self, key: &K) -> Option<V>;
    fn set(&self, key: K, value: V);
    /// Drop every entry.
    fn clear(&self);
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// LRU cache whose entries expire a fixed time after insertion.
pub struct TtlCache<K: Hash + Eq, V> {
    ttl: Duration,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
}

impl<K: Hash + Eq, V> TtlCache<K, V> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of stored entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> ResultCache<K, V> for TtlCache<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = entries.peek(key)?.inserted_at.elapsed() >= self.ttl;
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    fn set(&self, key: K, value: V) {
        self.entries.lock().put(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// A cache that stores nothing.
pub struct NoCache<K, V>(PhantomData<fn(K) -> V>);

impl<K, V> NoCache<K, V> {
    #[must_use]
    pub fn new() -> Self {
        NoCache(PhantomData)
    }
}

impl<K, V> Default for NoCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ResultCache<K, V> for NoCache<K, V> {
    fn get(&self, _key: &K) -> Option<V> {
        None
    }

    fn set(&self, _key: K, _value: V) {}

    fn clear(&self) {}
}

/// Return the cached value for `key`, or compute, store and return it.
///
/// Concurrent misses may both compute; the last write wins.
///
/// # Errors
/// Whatever `compute` returns; errors are not cached.
pub fn read_through<K, V, E>(
    cache: &dyn ResultCache<K, V>,
    key: K,
    compute: impl FnOnce() -> Result<V, E>,
) -> Result<V, E>
where
    V: Clone,
{
    if let Some(value) = cache.get(&key) {
        debug!(hit = true, "result cache");
        return Ok(value);
    }
    debug!(hit = false, "result cache");
    let value = compute()?;
    cache.set(key, value.clone());
    Ok(value)
}
