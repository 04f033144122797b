// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Reference Result Cache
//!
//! Keyed by the canonical [`CacheKey`] so two cells asking for the same
//! reference share one entry.
//!
//! ## Freshness
//!
//! ```text
//! age < stale_time            → served from cache
//! stale_time <= age           → refetched on next access
//! idle for gc_time            → evicted
//! ```
//!
//! Concurrent misses for one key are coalesced by moka's `get_with`: only one
//! fetch runs, the others wait for its value.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::future::Cache;
use refcache_core::{CacheKey, CachePolicy};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    fetched_at: Instant,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of misses (including stale entries)
    pub misses: u64,
    /// Cache hit rate (0.0 - 1.0)
    pub hit_rate: f64,
    /// Number of entries currently in cache
    pub entry_count: u64,
    /// Keys with a fetch in progress
    pub in_flight: usize,
}

/// Removes the in-flight mark when the fetch completes or is cancelled
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<CacheKey, usize>,
    key: CacheKey,
}

impl<'a> InFlightGuard<'a> {
    fn new(in_flight: &'a DashMap<CacheKey, usize>, key: &CacheKey) -> Self {
        *in_flight.entry(key.clone()).or_insert(0) += 1;
        Self {
            in_flight,
            key: key.clone(),
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.in_flight.entry(self.key.clone()) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }
}

/// Per-kind result cache
pub struct ReferenceCache<V> {
    cache: Cache<CacheKey, CachedEntry<V>>,
    policy: CachePolicy,
    in_flight: DashMap<CacheKey, usize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> ReferenceCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(policy: CachePolicy) -> Self {
        let cache = Cache::builder()
            .max_capacity(policy.max_capacity)
            .time_to_idle(policy.gc_time)
            .build();

        Self {
            cache,
            policy,
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Fresh cached value, counted as a hit or a miss.
    ///
    /// A stale entry is dropped.
    async fn get_fresh(&self, key: &CacheKey) -> Option<V> {
        if let Some(entry) = self.cache.get(key).await {
            if !self.policy.is_stale(entry.fetched_at.elapsed()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value);
            }
            trace!(key = %key, "cache entry stale");
            self.cache.invalidate(key).await;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Fresh cached value, or the result of `fetch`.
    ///
    /// A stale entry is dropped before fetching.
    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get_fresh(key).await {
            return value;
        }

        let _guard = InFlightGuard::new(&self.in_flight, key);
        let entry = self
            .cache
            .get_with(key.clone(), async move {
                CachedEntry {
                    value: fetch().await,
                    fetched_at: Instant::now(),
                }
            })
            .await;
        entry.value
    }

    /// Fresh values for `keys`, fetching every miss with one `fetch` call.
    ///
    /// `fetch` gets the indices of the missing keys and returns their values
    /// in that order. A slot stays `None` only if `fetch` returned too few.
    pub async fn get_or_fetch_many<F, Fut>(&self, keys: &[CacheKey], fetch: F) -> Vec<Option<V>>
    where
        F: FnOnce(Vec<usize>) -> Fut,
        Fut: Future<Output = Vec<V>>,
    {
        let mut values = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let value = self.get_fresh(key).await;
            if value.is_none() {
                missing.push(index);
            }
            values.push(value);
        }
        if missing.is_empty() {
            return values;
        }

        let _guards: Vec<_> = missing
            .iter()
            .map(|&index| InFlightGuard::new(&self.in_flight, &keys[index]))
            .collect();
        let fetched = fetch(missing.clone()).await;
        for (index, value) in missing.into_iter().zip(fetched) {
            self.insert(keys[index].clone(), value.clone()).await;
            values[index] = Some(value);
        }
        values
    }

    /// Cached value regardless of age; never fetches
    pub async fn peek(&self, key: &CacheKey) -> Option<V> {
        self.cache.get(key).await.map(|entry| entry.value)
    }

    /// Cached and past its stale time
    pub async fn is_stale(&self, key: &CacheKey) -> bool {
        match self.cache.get(key).await {
            Some(entry) => self.policy.is_stale(entry.fetched_at.elapsed()),
            None => false,
        }
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub async fn insert(&self, key: CacheKey, value: V) {
        self.cache
            .insert(
                key,
                CachedEntry {
                    value,
                    fetched_at: Instant::now(),
                },
            )
            .await;
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }

    /// Clear all cached results
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
            entry_count: self.cache.entry_count(),
            in_flight: self.in_flight.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refcache_core::{AppReference, ScopedRequest};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn key(id: &str) -> CacheKey {
        ScopedRequest::new("p1", AppReference::by_id(id)).key()
    }

    fn policy(stale_ms: u64) -> CachePolicy {
        CachePolicy::new(Duration::from_millis(stale_ms), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_from_cache() {
        let cache: ReferenceCache<Option<String>> = ReferenceCache::new(policy(60_000));
        let calls = &AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_fetch(&key("a1"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Some("App".to_string())
                })
                .await;
            assert_eq!(value.as_deref(), Some("App"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let cache: ReferenceCache<u32> = ReferenceCache::new(policy(20));
        let calls = &AtomicU32::new(0);
        let fetch = move || async move { calls.fetch_add(1, Ordering::SeqCst) + 1 };

        assert_eq!(cache.get_or_fetch(&key("a1"), fetch).await, 1);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.is_stale(&key("a1")).await);
        assert_eq!(cache.get_or_fetch(&key("a1"), fetch).await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache: ReferenceCache<u32> = ReferenceCache::new(policy(60_000));
        let calls = &AtomicU32::new(0);
        let k = key("a1");

        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            7
        };
        let (a, b) = tokio::join!(cache.get_or_fetch(&k, fetch), cache.get_or_fetch(&k, fetch));

        assert_eq!((a, b), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_fetching(&k));
    }

    #[tokio::test]
    async fn test_is_fetching_during_fetch() {
        let cache: ReferenceCache<u32> = ReferenceCache::new(policy(60_000));
        let k = key("a1");
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let fetching = cache.get_or_fetch(&k, || async move {
            let _ = rx.await;
            1
        });
        let observer = async {
            tokio::task::yield_now().await;
            let seen = cache.is_fetching(&k);
            let _ = tx.send(());
            seen
        };
        let (value, seen) = tokio::join!(fetching, observer);

        assert_eq!(value, 1);
        assert!(seen);
        assert!(!cache.is_fetching(&k));
    }

    #[tokio::test]
    async fn test_peek_insert_invalidate() {
        let cache: ReferenceCache<Option<String>> = ReferenceCache::new(policy(60_000));
        let k = key("a1");

        assert_eq!(cache.peek(&k).await, None);
        cache.insert(k.clone(), None).await;
        assert_eq!(cache.peek(&k).await, Some(None));

        cache.invalidate(&k).await;
        assert_eq!(cache.peek(&k).await, None);
    }
}
