//! Lookup cache built on [`moka`].
//!
//! The engine builds one [`CacheLayer`] per run to memoise template
//! resolution, so every `(bucket, owner)` pair hits the database at most
//! once per run. Values are stored as-is (no serialization) and may include
//! negative results such as `Option::None`.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

// ── cache stats ──────────────────────────────────────────────────────

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate in `0.0..=1.0`; `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── cache layer ──────────────────────────────────────────────────────

/// An async-aware cache keyed by `K`.
pub struct CacheLayer<K, V> {
    name: &'static str,
    inner: Cache<K, V>,
    stats: Arc<CacheStats>,
}

impl<K, V> Clone for CacheLayer<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<K, V> CacheLayer<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn builder(name: &'static str) -> CacheLayerBuilder {
        CacheLayerBuilder {
            name,
            max_capacity: 10_000,
            ttl: None,
        }
    }

    /// Look up a cached value. Returns `None` on miss.
    pub async fn get(&self, key: &K) -> Option<V> {
        match self.inner.get(key).await {
            Some(value) => {
                self.stats.record_hit();
                debug!(cache = self.name, key = ?key, "cache hit");
                Some(value)
            }
            None => {
                self.stats.record_miss();
                debug!(cache = self.name, key = ?key, "cache miss");
                None
            }
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Return the cached value or run `loader`, caching only successes.
    ///
    /// Loader errors are returned unchanged and leave the key uncached so the
    /// next lookup retries.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(cached) = self.get(&key).await {
            return Ok(cached);
        }

        let value = loader().await?;
        self.inner.insert(key, value.clone()).await;
        Ok(value)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`CacheLayer`].
pub struct CacheLayerBuilder {
    name: &'static str,
    max_capacity: u64,
    ttl: Option<Duration>,
}

impl CacheLayerBuilder {
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    /// Expire entries after `ttl`. Per-run caches leave this unset.
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn build<K, V>(self) -> CacheLayer<K, V>
    where
        K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let mut builder = Cache::builder().max_capacity(self.max_capacity);
        if let Some(ttl) = self.ttl {
            builder = builder.time_to_live(ttl);
        }

        debug!(
            name = self.name,
            max_capacity = self.max_capacity,
            "cache layer created"
        );

        CacheLayer {
            name: self.name,
            inner: builder.build(),
            stats: Arc::new(CacheStats::default()),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cache() -> CacheLayer<String, Option<u32>> {
        CacheLayer::<String, Option<u32>>::builder("test")
            .max_capacity(100)
            .build()
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = make_cache();
        cache.insert("k".into(), Some(7)).await;
        assert_eq!(cache.get(&"k".to_string()).await, Some(Some(7)));
    }

    #[tokio::test]
    async fn negative_results_are_cached() {
        let cache = make_cache();
        cache.insert("missing".into(), None).await;
        assert_eq!(cache.get(&"missing".to_string()).await, Some(None));
    }

    #[tokio::test]
    async fn loader_runs_once() {
        let cache = make_cache();

        let first: Result<_, String> = cache
            .get_or_try_insert_with("k".into(), || async { Ok(Some(1)) })
            .await;
        assert_eq!(first.unwrap(), Some(1));

        let second: Result<_, String> = cache
            .get_or_try_insert_with("k".into(), || async { Ok(Some(999)) })
            .await;
        assert_eq!(second.unwrap(), Some(1));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn loader_errors_are_not_cached() {
        let cache = make_cache();

        let failed: Result<Option<u32>, String> = cache
            .get_or_try_insert_with("k".into(), || async { Err("db down".to_string()) })
            .await;
        assert!(failed.is_err());

        let retried: Result<_, String> = cache
            .get_or_try_insert_with("k".into(), || async { Ok(Some(2)) })
            .await;
        assert_eq!(retried.unwrap(), Some(2));
    }

    #[test]
    fn stats_display() {
        let stats = CacheStats::default();
        stats.hits.store(3, Ordering::Relaxed);
        stats.misses.store(1, Ordering::Relaxed);
        let display = format!("{stats}");
        assert!(display.contains("hits=3"));
        assert!(display.contains("75.00%"));
    }
}
