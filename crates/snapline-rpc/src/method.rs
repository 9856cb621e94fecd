//! Method names. Identical on every transport.

pub const PING: &str = "SessionState.Ping";
pub const KILL: &str = "SessionState.Kill";
pub const SET_KEY: &str = "SessionState.SetKey";
pub const GET_CONFIG_POLICY: &str = "SessionState.GetConfigPolicy";

pub const COLLECT_METRICS: &str = "Collector.CollectMetrics";
pub const GET_METRIC_TYPES: &str = "Collector.GetMetricTypes";

pub const PROCESS: &str = "Processor.Process";
pub const PUBLISH: &str = "Publisher.Publish";

pub const STREAM_METRICS: &str = "StreamCollector.StreamMetrics";
