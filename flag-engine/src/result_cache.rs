//! In-memory, tag-invalidated cache for fully evaluated results.
//!
//! Entries expire after a TTL (the safety net when an invalidation is missed) and can
//! be purged in bulk by tag (the fast path when an editor signals a change). Both
//! mechanisms are always active.
//!
//! Backed by Moka, which shards its map internally: concurrent readers of one key
//! never wait on a writer of another. Misses go through [`ResultCache::get_or_try_load`],
//! which coalesces concurrent loads of one key into a single call, so a burst of
//! lookups right after an invalidation reaches the store once per key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use moka::future::Cache;
use tracing::debug;

/// Tag carried by every entry derived from the flag definitions.
pub const FLAGS_CACHE_TAG: &str = "flags";

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

// a load that raced an invalidation is retried once, then served uncached
const LOAD_ATTEMPTS: usize = 2;

/// A cached value with its invalidation metadata. Never handed out to callers.
#[derive(Debug)]
pub struct CacheEntry<V> {
    value: V,
    tags: Vec<String>,
    expires_at: Instant,
    // cache generation when the data behind `value` was read
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    fn has_any_tag(&self, tags: &[&str]) -> bool {
        self.tags.iter().any(|tag| tags.contains(&tag.as_str()))
    }
}

pub struct ResultCache<V> {
    entries: Cache<String, Arc<CacheEntry<V>>>,
    default_ttl: Duration,
    generation: AtomicU64,
    // generation of the last invalidation of each tag
    tag_generations: RwLock<HashMap<String, u64>>,
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `max_entries` values, each living `default_ttl`
    /// unless a shorter lifetime is given when it is stored.
    pub fn new(max_entries: u64, default_ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(default_ttl)
                .build(),
            default_ttl,
            generation: AtomicU64::new(0),
            tag_generations: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.get_with_ttl(key).await.map(|(value, _)| value)
    }

    /// Like [`ResultCache::get`], also returning how long the value remains valid.
    pub async fn get_with_ttl(&self, key: &str) -> Option<(V, Duration)> {
        let entry = self.entries.get(key).await?;
        self.usable(&entry)
    }

    pub async fn put(
        &self,
        key: impl Into<String>,
        value: V,
        tags: &[&str],
        ttl: Option<Duration>,
    ) {
        let entry = self.new_entry(value, tags, ttl, self.generation());
        self.entries.insert(key.into(), Arc::new(entry)).await;
    }

    /// Returns the value cached under `key`, running `load` on a miss.
    ///
    /// Concurrent misses on one key share a single `load`. The loader can cap the
    /// entry's lifetime below the default TTL, e.g. to the remaining lifetime of
    /// the data it was computed from. A value loaded from data read before an
    /// invalidation of its tags is not served; the load runs again instead.
    /// Load errors are shared by the waiting callers and never cached.
    ///
    /// Returns the value and its remaining lifetime.
    pub async fn get_or_try_load<E, F, Fut>(
        &self,
        key: &str,
        tags: &[&str],
        load: F,
    ) -> Result<(V, Duration), Arc<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(V, Option<Duration>), E>>,
        E: Send + Sync + 'static,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let generation = self.generation();
            let pending = load();
            let init = async move {
                let (value, ttl) = pending.await?;
                let ttl = ttl.map_or(self.default_ttl, |ttl| ttl.min(self.default_ttl));
                Ok(Arc::new(self.new_entry(value, tags, Some(ttl), generation)))
            };

            let entry = self.entries.try_get_with(key.to_string(), init).await?;
            if let Some(usable) = self.usable(&entry) {
                return Ok(usable);
            }

            // expired, or loaded before an invalidation
            self.entries.invalidate(key).await;
            if attempt == LOAD_ATTEMPTS {
                debug!(key, "load keeps racing invalidations, serving uncached value");
                return Ok((entry.value.clone(), Duration::ZERO));
            }
        }
    }

    /// Purge every entry carrying any of `tags`. Returns how many entries were removed.
    ///
    /// Loads that read their data before this call are discarded when they finish.
    pub async fn invalidate(&self, tags: &[&str]) -> usize {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut tag_generations = self.write_tag_generations();
            for tag in tags {
                tag_generations.insert(tag.to_string(), generation);
            }
        }

        let stale: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.has_any_tag(tags))
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.entries.invalidate(key.as_str()).await;
        }

        debug!(?tags, purged = stale.len(), "invalidated cache entries");
        stale.len()
    }

    /// Monotonic counter bumped by every `invalidate` call.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    fn new_entry(
        &self,
        value: V,
        tags: &[&str],
        ttl: Option<Duration>,
        generation: u64,
    ) -> CacheEntry<V> {
        CacheEntry {
            value,
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            expires_at: Instant::now() + ttl.unwrap_or(self.default_ttl),
            generation,
        }
    }

    fn usable(&self, entry: &CacheEntry<V>) -> Option<(V, Duration)> {
        let remaining = entry.remaining(Instant::now());
        if remaining.is_zero() || self.invalidated_since(entry) {
            return None;
        }
        Some((entry.value.clone(), remaining))
    }

    fn invalidated_since(&self, entry: &CacheEntry<V>) -> bool {
        let tag_generations = match self.tag_generations.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entry.tags.iter().any(|tag| {
            tag_generations
                .get(tag)
                .is_some_and(|invalidated_at| *invalidated_at > entry.generation)
        })
    }

    fn write_tag_generations(&self) -> RwLockWriteGuard<'_, HashMap<String, u64>> {
        match self.tag_generations.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
