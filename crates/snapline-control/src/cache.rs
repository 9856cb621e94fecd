//! Metric result cache.
//!
//! Entries are keyed by the metric's full namespace string and are fresh for
//! the cache's TTL, which is fixed when the cache is built. Entries are never
//! evicted; a stale entry is only replaced by the next `put`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::error::Result;
use snapline_core::meta::PluginMeta;
use snapline_core::metric::Metric;

use crate::client::{no_metrics, CollectorClient, SessionClient};

struct CacheCell {
    stored: Instant,
    metric: Metric,
    hits: u64,
    misses: u64,
}

/// Hit/miss counters for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct MetricCache {
    ttl: Duration,
    table: DashMap<String, CacheCell>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetricCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            table: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry: counts a hit and returns it. Stale entry: counts a miss
    /// and returns `None`. Unknown key: `None`, counters untouched.
    pub fn get(&self, key: &str) -> Option<Metric> {
        let mut cell = self.table.get_mut(key)?;
        if cell.stored.elapsed() < self.ttl {
            cell.hits += 1;
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(namespace = key, hits = cell.hits, misses = cell.misses, "cache hit");
            Some(cell.metric.clone())
        } else {
            cell.misses += 1;
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(namespace = key, hits = cell.hits, misses = cell.misses, "cache miss");
            None
        }
    }

    /// Insert or refresh `key`.
    pub fn put(&self, key: impl Into<String>, metric: Metric) {
        let now = Instant::now();
        self.table
            .entry(key.into())
            .and_modify(|cell| {
                cell.stored = now;
                cell.metric = metric.clone();
            })
            .or_insert_with(|| CacheCell {
                stored: now,
                metric,
                hits: 0,
                misses: 0,
            });
    }

    pub fn stats(&self, key: &str) -> Option<CellStats> {
        self.table.get(key).map(|c| CellStats {
            hits: c.hits,
            misses: c.misses,
        })
    }

    pub fn total_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn total_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// --------------------
// CachedCollector
// --------------------

/// Collector client that answers fresh metrics from a [`MetricCache`] and
/// collects the rest in one call.
pub struct CachedCollector {
    inner: Arc<dyn CollectorClient>,
    cache: MetricCache,
}

impl CachedCollector {
    pub fn new(inner: Arc<dyn CollectorClient>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: MetricCache::new(ttl),
        }
    }

    /// TTL from the plugin's meta, else `default_ttl`.
    pub fn for_plugin(inner: Arc<dyn CollectorClient>, meta: &PluginMeta, default_ttl: Duration) -> Self {
        let ttl = meta
            .cache_ttl_ms
            .map(Duration::from_millis)
            .unwrap_or(default_ttl);
        Self::new(inner, ttl)
    }

    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }
}

#[async_trait]
impl SessionClient for CachedCollector {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn kill(&self, reason: &str) -> Result<()> {
        self.inner.kill(reason).await
    }

    async fn set_key(&self, encrypted_key: Vec<u8>) -> Result<()> {
        self.inner.set_key(encrypted_key).await
    }

    async fn get_config_policy(&self) -> Result<ConfigPolicyTree> {
        self.inner.get_config_policy().await
    }
}

#[async_trait]
impl CollectorClient for CachedCollector {
    async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>> {
        if requested.is_empty() {
            return Err(no_metrics());
        }
        let mut results = Vec::with_capacity(requested.len());
        let mut to_collect = Vec::new();
        for m in requested {
            match self.cache.get(&m.cache_key()) {
                Some(cached) => results.push(cached),
                None => to_collect.push(m),
            }
        }
        if to_collect.is_empty() {
            return Ok(results);
        }

        let collected = self.inner.collect_metrics(to_collect).await?;
        for m in &collected {
            self.cache.put(m.cache_key(), m.clone());
        }
        results.extend(collected);
        Ok(results)
    }

    async fn get_metric_types(&self, config: ConfigTable) -> Result<Vec<Metric>> {
        self.inner.get_metric_types(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapline_core::metric::{MetricData, Namespace};

    #[test]
    fn unknown_key_leaves_counters_alone() {
        let cache = MetricCache::new(Duration::from_secs(1));
        assert!(cache.get("/nope").is_none());
        assert_eq!(cache.total_hits(), 0);
        assert_eq!(cache.total_misses(), 0);
        assert!(cache.stats("/nope").is_none());
    }

    #[test]
    fn put_overwrites() {
        let cache = MetricCache::new(Duration::from_secs(60));
        let ns = Namespace::new(&["a", "b"]);
        cache.put("/a/b", Metric::new(ns.clone(), MetricData::Int64(1)));
        cache.put("/a/b", Metric::new(ns, MetricData::Int64(2)));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("/a/b").map(|m| m.data),
            Some(MetricData::Int64(2))
        );
    }
}
