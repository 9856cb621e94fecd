//! Request and reply bodies carried (encoded by the session `Encoder`) in
//! native and JSON-RPC frames. `SetKeyArgs` travels unencrypted: the key it
//! carries is already wrapped with the plugin's public key.

use serde::{Deserialize, Serialize};

use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::metric::Metric;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillArgs {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetKeyArgs {
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectMetricsArgs {
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectMetricsReply {
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMetricTypesArgs {
    pub config: ConfigTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMetricTypesReply {
    pub metric_types: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessArgs {
    pub content_type: String,
    pub content: Vec<u8>,
    pub config: ConfigTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReply {
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishArgs {
    pub content_type: String,
    pub content: Vec<u8>,
    pub config: ConfigTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetConfigPolicyReply {
    pub policy: ConfigPolicyTree,
}
