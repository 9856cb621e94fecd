//! Mock collector plugin used by end-to-end tests.
//!
//! Environment:
//! - `SNAPLINE_MOCK_RPC`: `native` (default), `jsonrpc`, or `proto`
//! - `SNAPLINE_MOCK_UNSECURE=1`: skip key exchange
//! - `SNAPLINE_MOCK_STREAM=1`: serve as a stream collector (forces `proto`)
//!
//! Requesting `/intel/mock/panic` panics inside the plugin.

use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use snapline::core::config::{ConfigTable, ConfigValue};
use snapline::core::cpolicy::{ConfigPolicyTree, PolicyNode, StringRule};
use snapline::core::error::{Result, SnapError};
use snapline::core::meta::{PluginMeta, PluginType, RpcType};
use snapline::core::metric::{Metric, MetricData, Namespace};
use snapline::plugin::plugin::{Capability, Collector, Plugin, StreamCollector};
use snapline::plugin::start::start;

const NAME: &str = "mock";
const VERSION: u32 = 1;
const STREAM_PERIOD: Duration = Duration::from_millis(50);

struct Mock;

fn value_for(m: &Metric) -> MetricData {
    let seed = m.namespace.to_string().len() as i64;
    MetricData::Int64(seed * 10 + Utc::now().timestamp_subsec_millis() as i64 % 10)
}

fn collect(requested: Vec<Metric>) -> Result<Vec<Metric>> {
    let mut out = Vec::with_capacity(requested.len());
    for m in requested {
        let ns = m.namespace.to_string();
        if ns == "/intel/mock/panic" {
            panic!("mock collector asked to panic");
        }
        if ns == "/intel/mock/fail" {
            return Err(SnapError::Internal("mock collector asked to fail".into()));
        }
        let data = value_for(&m);
        let mut collected = m.with_timestamp(Utc::now());
        if let Some(ConfigValue::Str(name)) = collected.config.as_ref().and_then(|c| c.get("name")) {
            collected.tags.insert("name".into(), name.clone());
        }
        collected.data = data;
        out.push(collected);
    }
    Ok(out)
}

fn metric_types() -> Vec<Metric> {
    vec![
        Metric::new(Namespace::new(&["intel", "mock", "foo"]), MetricData::Null)
            .with_version(VERSION as i64),
        Metric::new(Namespace::new(&["intel", "mock", "bar"]), MetricData::Null)
            .with_version(VERSION as i64),
        Metric::new(
            Namespace::new(&["intel", "mock"])
                .add_dynamic("host", "host name")
                .add_static("baz"),
            MetricData::Null,
        )
        .with_version(VERSION as i64),
    ]
}

#[async_trait]
impl Plugin for Mock {
    async fn config_policy(&self) -> Result<ConfigPolicyTree> {
        let tree = ConfigPolicyTree::new();
        let node = PolicyNode::new()
            .with(StringRule::new("name", false)?.with_default("bob"))
            .with(StringRule::new("password", true)?);
        tree.add(&["intel", "mock"], node)?;
        Ok(tree)
    }
}

#[async_trait]
impl Collector for Mock {
    async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>> {
        collect(requested)
    }

    async fn get_metric_types(&self, _config: ConfigTable) -> Result<Vec<Metric>> {
        Ok(metric_types())
    }
}

#[async_trait]
impl StreamCollector for Mock {
    async fn stream_metrics(
        &self,
        requested: Vec<Metric>,
        out: mpsc::Sender<Vec<Metric>>,
        stop: CancellationToken,
    ) -> Result<()> {
        let mut tick = tokio::time::interval(STREAM_PERIOD);
        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = tick.tick() => {}
            }
            let batch = collect(requested.clone())?;
            if out.send(batch).await.is_err() {
                return Ok(());
            }
        }
    }

    async fn get_metric_types(&self, _config: ConfigTable) -> Result<Vec<Metric>> {
        Ok(metric_types())
    }
}

fn flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

fn build() -> Result<(PluginMeta, Capability)> {
    let stream = flag("SNAPLINE_MOCK_STREAM");
    let rpc = match std::env::var("SNAPLINE_MOCK_RPC").as_deref() {
        _ if stream => RpcType::Proto,
        Ok("jsonrpc") => RpcType::JsonRpc,
        Ok("proto") => RpcType::Proto,
        _ => RpcType::Native,
    };
    let plugin_type = if stream {
        PluginType::StreamCollector
    } else {
        PluginType::Collector
    };
    let meta = PluginMeta::new(NAME, VERSION, plugin_type, vec![], vec![])?
        .rpc_type(rpc)
        .unsecure(flag("SNAPLINE_MOCK_UNSECURE"))
        .cache_ttl_ms(100);
    let capability = if stream {
        Capability::StreamCollector(Arc::new(Mock))
    } else {
        Capability::Collector(Arc::new(Mock))
    };
    Ok((meta, capability))
}

#[tokio::main]
async fn main() -> ExitCode {
    match build() {
        Ok((meta, capability)) => start(meta, capability).await,
        Err(e) => {
            eprintln!("mock collector setup failed: {e}");
            ExitCode::FAILURE
        }
    }
}
