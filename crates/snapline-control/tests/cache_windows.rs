#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use snapline_control::cache::{CachedCollector, CellStats, MetricCache};
use snapline_control::client::{CollectorClient, SessionClient};
use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::error::Result;
use snapline_core::meta::{PluginMeta, PluginType};
use snapline_core::metric::{Metric, MetricData, Namespace};

fn metric(path: &[&str], v: i64) -> Metric {
    Metric::new(Namespace::new(path), MetricData::Int64(v))
}

#[tokio::test]
async fn get_after_put_hits_then_expires() {
    let cache = MetricCache::new(Duration::from_millis(80));
    cache.put("/a/b", metric(&["a", "b"], 1));

    let hit = cache.get("/a/b").expect("fresh");
    assert_eq!(hit.data, MetricData::Int64(1));
    assert_eq!(cache.stats("/a/b"), Some(CellStats { hits: 1, misses: 0 }));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get("/a/b").is_none());
    assert_eq!(cache.stats("/a/b"), Some(CellStats { hits: 1, misses: 1 }));
    assert_eq!(cache.total_hits(), 1);
    assert_eq!(cache.total_misses(), 1);

    // stale entries stay until overwritten
    assert_eq!(cache.len(), 1);
    cache.put("/a/b", metric(&["a", "b"], 2));
    assert_eq!(cache.get("/a/b").unwrap().data, MetricData::Int64(2));
}

#[test]
fn caches_are_independent() {
    let short = MetricCache::new(Duration::from_millis(1));
    let long = MetricCache::new(Duration::from_secs(60));
    short.put("/x", metric(&["x"], 1));
    long.put("/x", metric(&["x"], 1));
    std::thread::sleep(Duration::from_millis(10));
    assert!(short.get("/x").is_none());
    assert!(long.get("/x").is_some());
}

struct Counting {
    calls: AtomicUsize,
    collected: AtomicUsize,
}

#[async_trait]
impl SessionClient for Counting {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
    async fn kill(&self, _reason: &str) -> Result<()> {
        Ok(())
    }
    async fn set_key(&self, _key: Vec<u8>) -> Result<()> {
        Ok(())
    }
    async fn get_config_policy(&self) -> Result<ConfigPolicyTree> {
        Ok(ConfigPolicyTree::new())
    }
}

#[async_trait]
impl CollectorClient for Counting {
    async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.collected.fetch_add(requested.len(), Ordering::SeqCst);
        Ok(requested
            .into_iter()
            .map(|m| Metric {
                data: MetricData::Int64(5),
                ..m
            })
            .collect())
    }
    async fn get_metric_types(&self, _config: ConfigTable) -> Result<Vec<Metric>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn cached_collector_only_collects_misses() {
    let inner = Arc::new(Counting {
        calls: AtomicUsize::new(0),
        collected: AtomicUsize::new(0),
    });
    let cached = CachedCollector::new(inner.clone(), Duration::from_secs(60));

    let first = cached
        .collect_metrics(vec![metric(&["a"], 0), metric(&["b"], 0)])
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

    let second = cached
        .collect_metrics(vec![metric(&["a"], 0), metric(&["c"], 0)])
        .await
        .unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second[0].namespace.to_string(), "/a");
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    assert_eq!(inner.collected.load(Ordering::SeqCst), 3);
    assert_eq!(cached.cache().total_hits(), 1);

    cached
        .collect_metrics(vec![metric(&["a"], 0), metric(&["b"], 0), metric(&["c"], 0)])
        .await
        .unwrap();
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

    let err = cached.collect_metrics(vec![]).await.expect_err("must fail");
    assert_eq!(err.to_string(), "protocol: no metrics to collect");
}

#[test]
fn ttl_comes_from_meta_when_declared() {
    let inner = Arc::new(Counting {
        calls: AtomicUsize::new(0),
        collected: AtomicUsize::new(0),
    });
    let meta = PluginMeta::new("m", 1, PluginType::Collector, vec![], vec![]).unwrap();
    let default = Duration::from_millis(500);

    let c = CachedCollector::for_plugin(inner.clone(), &meta, default);
    assert_eq!(c.cache().ttl(), default);

    let meta = meta.cache_ttl_ms(42);
    let c = CachedCollector::for_plugin(inner, &meta, default);
    assert_eq!(c.cache().ttl(), Duration::from_millis(42));
}
