//! Capability contracts implemented by plugin authors.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::error::Result;
use snapline_core::meta::PluginType;
use snapline_core::metric::Metric;

/// Shared by every capability.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Policy used by the control process to validate and default this
    /// plugin's configuration.
    async fn config_policy(&self) -> Result<ConfigPolicyTree>;
}

#[async_trait]
pub trait Collector: Plugin {
    async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>>;
    async fn get_metric_types(&self, config: ConfigTable) -> Result<Vec<Metric>>;
}

#[async_trait]
pub trait Processor: Plugin {
    /// Returns the content type and payload of the processed metrics.
    async fn process(
        &self,
        content_type: String,
        content: Vec<u8>,
        config: ConfigTable,
    ) -> Result<(String, Vec<u8>)>;
}

#[async_trait]
pub trait Publisher: Plugin {
    async fn publish(&self, content_type: String, content: Vec<u8>, config: ConfigTable)
        -> Result<()>;
}

/// Collector that pushes batches on its own schedule.
#[async_trait]
pub trait StreamCollector: Plugin {
    /// Push batches into `out` until `stop` is cancelled or `out` closes.
    async fn stream_metrics(
        &self,
        requested: Vec<Metric>,
        out: mpsc::Sender<Vec<Metric>>,
        stop: CancellationToken,
    ) -> Result<()>;

    async fn get_metric_types(&self, config: ConfigTable) -> Result<Vec<Metric>>;
}

/// The plugin implementation a session serves.
#[derive(Clone)]
pub enum Capability {
    Collector(Arc<dyn Collector>),
    Processor(Arc<dyn Processor>),
    Publisher(Arc<dyn Publisher>),
    StreamCollector(Arc<dyn StreamCollector>),
}

impl Capability {
    pub fn plugin_type(&self) -> PluginType {
        match self {
            Capability::Collector(_) => PluginType::Collector,
            Capability::Processor(_) => PluginType::Processor,
            Capability::Publisher(_) => PluginType::Publisher,
            Capability::StreamCollector(_) => PluginType::StreamCollector,
        }
    }

    pub async fn config_policy(&self) -> Result<ConfigPolicyTree> {
        match self {
            Capability::Collector(p) => p.config_policy().await,
            Capability::Processor(p) => p.config_policy().await,
            Capability::Publisher(p) => p.config_policy().await,
            Capability::StreamCollector(p) => p.config_policy().await,
        }
    }
}
