//! Keyed TTL caching for GitHub lookups.
//!
//! Each [`TtlCache`] instance is one cache domain (emails, branches,
//! installation ids, IP ranges). Entries carry the instant they were stored
//! and are considered fresh while `now - stored_at <= ttl`. Expired entries
//! are not evicted; they stay readable through [`TtlCache::get_stale`] until a
//! successful refresh overwrites them.
//!
//! Refreshes are coalesced per key: concurrent misses for the same key wait on
//! an in-flight lock and re-read the value stored by whichever caller fetched
//! first. The entry map lock is never held across an await, so misses for
//! different keys do not serialize on each other's network calls.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Cached value paired with the instant it was stored.
///
/// Value and timestamp are replaced together; a reader never sees one
/// without the other.
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        Instant::now().saturating_duration_since(self.stored_at) > ttl
    }
}

type FlightLock = Arc<tokio::sync::Mutex<()>>;

/// In-memory cache with a fixed per-domain time-to-live.
///
/// # Examples
///
/// ```
/// use github_app_client::cache::TtlCache;
/// use std::time::Duration;
///
/// let cache: TtlCache<String, u64> = TtlCache::new("installations", Duration::from_secs(3600));
/// assert!(cache.get(&"acme/widgets".to_string()).is_none());
///
/// cache.set("acme/widgets".to_string(), 42);
/// assert_eq!(cache.get(&"acme/widgets".to_string()), Some(42));
/// ```
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<K, FlightLock>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache domain.
    ///
    /// # Arguments
    ///
    /// * `name` - Domain name used in log output
    /// * `ttl` - How long an entry stays fresh after it is stored
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get the value for `key` if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.lock_entries();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| entry.value.clone())
    }

    /// Get the value for `key` regardless of age.
    ///
    /// Used to keep serving the last good value when a refresh fails.
    pub fn get_stale(&self, key: &K) -> Option<V> {
        let entries = self.lock_entries();
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store `value` under `key`, stamping the current time.
    pub fn set(&self, key: K, value: V) {
        let mut entries = self.lock_entries();
        entries.insert(key, CacheEntry::new(value));
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// True when nothing has ever been stored.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Return the fresh value for `key`, or run `fetch` and store its result.
    ///
    /// A failed fetch stores nothing, so any previous (stale) entry survives
    /// and remains available through [`TtlCache::get_stale`].
    ///
    /// # Errors
    ///
    /// Returns whatever error `fetch` produced.
    pub async fn get_or_try_refresh<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let flight = self.flight_lock(&key);
        let guard = flight.lock().await;

        // Another caller may have refreshed the entry while we waited.
        if let Some(value) = self.get(&key) {
            drop(guard);
            self.release_flight(&key, &flight);
            return Ok(value);
        }

        debug!(cache = self.name, "Cache miss, fetching fresh value");
        let result = fetch().await;
        if let Ok(value) = &result {
            self.set(key.clone(), value.clone());
        }

        drop(guard);
        self.release_flight(&key, &flight);
        result
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        // Entries are swapped whole, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flight_lock(&self, key: &K) -> FlightLock {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.entry(key.clone()).or_default().clone()
    }

    fn release_flight(&self, key: &K, flight: &FlightLock) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this caller still hold the lock: nobody is waiting.
        if Arc::strong_count(flight) <= 2 {
            in_flight.remove(key);
        }
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
