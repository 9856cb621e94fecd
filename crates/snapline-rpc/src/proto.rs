//! Protobuf schema for the cross-language transport, and conversions between
//! the wire messages and core types.
//!
//! Messages are declared with `prost` derives directly; there is no build-time
//! codegen. Every RPC travels as an [`RpcFrame`] whose `body` is the prost
//! encoding of the method's argument or reply (sealed by the session encoder
//! when the plugin is secured).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use prost::Message;

use snapline_core::config::{ConfigTable, ConfigValue};
use snapline_core::cpolicy::{
    BoolRule, ConfigPolicyTree, FloatRule, IntegerRule, PolicyNode, Rule, StringRule,
};
use snapline_core::error::{Result, SnapError};
use snapline_core::metric::{self as core_metric, MetricData};

// --------------------
// Envelope
// --------------------

#[derive(Clone, PartialEq, Message)]
pub struct RpcFrame {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub method: String,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
    #[prost(string, tag = "4")]
    pub error: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, Message)]
pub struct KillArg {
    #[prost(string, tag = "1")]
    pub reason: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetKeyArg {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
}

// --------------------
// Metrics
// --------------------

#[derive(Clone, PartialEq, Message)]
pub struct Time {
    #[prost(int64, tag = "1")]
    pub sec: i64,
    #[prost(int64, tag = "2")]
    pub nsec: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct NamespaceElement {
    #[prost(string, tag = "1")]
    pub value: String,
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(string, tag = "3")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConfigMap {
    #[prost(map = "string, int64", tag = "1")]
    pub int_map: HashMap<String, i64>,
    #[prost(map = "string, string", tag = "2")]
    pub string_map: HashMap<String, String>,
    #[prost(map = "string, double", tag = "3")]
    pub float_map: HashMap<String, f64>,
    #[prost(map = "string, bool", tag = "4")]
    pub bool_map: HashMap<String, bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Metric {
    #[prost(message, repeated, tag = "1")]
    pub namespace: Vec<NamespaceElement>,
    #[prost(int64, tag = "2")]
    pub version: i64,
    #[prost(message, optional, tag = "3")]
    pub config: Option<ConfigMap>,
    #[prost(message, optional, tag = "4")]
    pub last_advertised_time: Option<Time>,
    #[prost(map = "string, string", tag = "5")]
    pub tags: HashMap<String, String>,
    #[prost(message, optional, tag = "6")]
    pub timestamp: Option<Time>,
    #[prost(string, tag = "7")]
    pub unit: String,
    #[prost(string, tag = "8")]
    pub description: String,
    #[prost(oneof = "metric::Data", tags = "9, 10, 11, 12, 13, 14, 15, 16, 17")]
    pub data: Option<metric::Data>,
}

pub mod metric {
    /// Absent means null.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Data {
        #[prost(string, tag = "9")]
        StringData(String),
        #[prost(float, tag = "10")]
        Float32Data(f32),
        #[prost(double, tag = "11")]
        Float64Data(f64),
        #[prost(int32, tag = "12")]
        Int32Data(i32),
        #[prost(int64, tag = "13")]
        Int64Data(i64),
        #[prost(uint32, tag = "14")]
        Uint32Data(u32),
        #[prost(uint64, tag = "15")]
        Uint64Data(u64),
        #[prost(bytes = "vec", tag = "16")]
        BytesData(Vec<u8>),
        #[prost(bool, tag = "17")]
        BoolData(bool),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct MetricsArg {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<Metric>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetricsReply {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<Metric>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetMetricTypesArg {
    #[prost(message, optional, tag = "1")]
    pub config: Option<ConfigMap>,
}

/// Argument of both `Process` and `Publish`.
#[derive(Clone, PartialEq, Message)]
pub struct PubProcArg {
    #[prost(string, tag = "1")]
    pub content_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub content: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub config: Option<ConfigMap>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProcessReply {
    #[prost(string, tag = "1")]
    pub content_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub content: Vec<u8>,
}

// --------------------
// Streaming
// --------------------

/// Client -> plugin on a metrics stream. The first frame must carry
/// `metrics_arg`; later frames update whichever fields are set.
#[derive(Clone, PartialEq, Message)]
pub struct CollectArg {
    #[prost(message, optional, tag = "1")]
    pub metrics_arg: Option<MetricsArg>,
    #[prost(int64, optional, tag = "2")]
    pub max_metrics_buffer: Option<i64>,
    #[prost(int64, optional, tag = "3")]
    pub max_collect_duration_ms: Option<i64>,
}

/// Plugin -> client on a metrics stream.
#[derive(Clone, PartialEq, Message)]
pub struct CollectReply {
    #[prost(message, optional, tag = "1")]
    pub metrics_reply: Option<MetricsReply>,
    #[prost(string, tag = "2")]
    pub error: String,
}

// --------------------
// Config policy
// --------------------

#[derive(Clone, PartialEq, Message)]
pub struct GetConfigPolicyReply {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<PolicyEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PolicyEntry {
    #[prost(string, repeated, tag = "1")]
    pub namespace: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub rules: Vec<PolicyRule>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PolicyRule {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(bool, tag = "2")]
    pub required: bool,
    #[prost(oneof = "policy_rule::Kind", tags = "3, 4, 5, 6")]
    pub kind: Option<policy_rule::Kind>,
}

pub mod policy_rule {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "3")]
        BoolRule(super::BoolSpec),
        #[prost(message, tag = "4")]
        StringRule(super::StringSpec),
        #[prost(message, tag = "5")]
        IntegerRule(super::IntegerSpec),
        #[prost(message, tag = "6")]
        FloatRule(super::FloatSpec),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct BoolSpec {
    #[prost(bool, optional, tag = "1")]
    pub default: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StringSpec {
    #[prost(string, optional, tag = "1")]
    pub default: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct IntegerSpec {
    #[prost(int64, optional, tag = "1")]
    pub default: Option<i64>,
    #[prost(int64, optional, tag = "2")]
    pub minimum: Option<i64>,
    #[prost(int64, optional, tag = "3")]
    pub maximum: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FloatSpec {
    #[prost(double, optional, tag = "1")]
    pub default: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub minimum: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub maximum: Option<f64>,
}

// --------------------
// Encode / decode helpers
// --------------------

pub fn encode<M: Message>(msg: &M) -> Vec<u8> {
    msg.encode_to_vec()
}

pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    M::decode(bytes).map_err(|e| SnapError::Decode(e.to_string()))
}

// --------------------
// Conversions
// --------------------

pub fn to_time(t: &DateTime<Utc>) -> Time {
    Time {
        sec: t.timestamp(),
        nsec: i64::from(t.timestamp_subsec_nanos()),
    }
}

/// Missing or out-of-range times become "now".
pub fn from_time(t: Option<&Time>) -> DateTime<Utc> {
    let Some(t) = t else {
        return Utc::now();
    };
    let nsec = u32::try_from(t.nsec).unwrap_or(0);
    match Utc.timestamp_opt(t.sec, nsec).single() {
        Some(dt) => dt,
        None => {
            tracing::warn!(sec = t.sec, nsec = t.nsec, "invalid metric time, using now");
            Utc::now()
        }
    }
}

pub fn to_config_map(table: &ConfigTable) -> ConfigMap {
    let mut out = ConfigMap::default();
    for (k, v) in table {
        match v {
            ConfigValue::Int(i) => {
                out.int_map.insert(k.clone(), *i);
            }
            ConfigValue::Float(f) => {
                out.float_map.insert(k.clone(), *f);
            }
            ConfigValue::Str(s) => {
                out.string_map.insert(k.clone(), s.clone());
            }
            ConfigValue::Bool(b) => {
                out.bool_map.insert(k.clone(), *b);
            }
        }
    }
    out
}

/// A key present in more than one map is malformed: the first one seen (in
/// int, float, string, bool order) wins and the rest are logged and dropped.
pub fn from_config_map(map: Option<&ConfigMap>) -> ConfigTable {
    let mut out = ConfigTable::new();
    let Some(map) = map else {
        return out;
    };
    let mut put = |k: &String, v: ConfigValue| {
        if out.contains_key(k) {
            tracing::warn!(key = %k, "config key present in more than one typed map, dropped");
            return;
        }
        out.insert(k.clone(), v);
    };
    for (k, v) in &map.int_map {
        put(k, ConfigValue::Int(*v));
    }
    for (k, v) in &map.float_map {
        put(k, ConfigValue::Float(*v));
    }
    for (k, v) in &map.string_map {
        put(k, ConfigValue::Str(v.clone()));
    }
    for (k, v) in &map.bool_map {
        put(k, ConfigValue::Bool(*v));
    }
    out
}

fn to_data(d: &MetricData) -> Option<metric::Data> {
    use metric::Data;
    match d {
        MetricData::String(v) => Some(Data::StringData(v.clone())),
        MetricData::Float32(v) => Some(Data::Float32Data(*v)),
        MetricData::Float64(v) => Some(Data::Float64Data(*v)),
        MetricData::Int32(v) => Some(Data::Int32Data(*v)),
        MetricData::Int64(v) => Some(Data::Int64Data(*v)),
        MetricData::Uint32(v) => Some(Data::Uint32Data(*v)),
        MetricData::Uint64(v) => Some(Data::Uint64Data(*v)),
        MetricData::Bytes(v) => Some(Data::BytesData(v.clone())),
        MetricData::Bool(v) => Some(Data::BoolData(*v)),
        MetricData::Null => None,
    }
}

fn from_data(d: Option<metric::Data>) -> MetricData {
    use metric::Data;
    match d {
        Some(Data::StringData(v)) => MetricData::String(v),
        Some(Data::Float32Data(v)) => MetricData::Float32(v),
        Some(Data::Float64Data(v)) => MetricData::Float64(v),
        Some(Data::Int32Data(v)) => MetricData::Int32(v),
        Some(Data::Int64Data(v)) => MetricData::Int64(v),
        Some(Data::Uint32Data(v)) => MetricData::Uint32(v),
        Some(Data::Uint64Data(v)) => MetricData::Uint64(v),
        Some(Data::BytesData(v)) => MetricData::Bytes(v),
        Some(Data::BoolData(v)) => MetricData::Bool(v),
        None => MetricData::Null,
    }
}

/// Core -> wire. Unset timestamps are stamped with "now".
pub fn to_proto_metric(m: &core_metric::Metric) -> Metric {
    let now = Utc::now();
    Metric {
        namespace: m
            .namespace
            .elements()
            .iter()
            .map(|e| NamespaceElement {
                value: e.value.clone(),
                description: e.description.clone(),
                name: e.name.clone(),
            })
            .collect(),
        version: m.version,
        config: m.config.as_ref().map(to_config_map),
        last_advertised_time: Some(to_time(&m.last_advertised_time.unwrap_or(now))),
        tags: m.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        timestamp: Some(to_time(&m.timestamp.unwrap_or(now))),
        unit: m.unit.clone(),
        description: m.description.clone(),
        data: to_data(&m.data),
    }
}

/// Wire -> core. Missing timestamps are stamped with "now".
pub fn from_proto_metric(m: Metric) -> core_metric::Metric {
    let tags: BTreeMap<String, String> = m.tags.into_iter().collect();
    core_metric::Metric {
        namespace: core_metric::Namespace(
            m.namespace
                .into_iter()
                .map(|e| core_metric::NamespaceElement {
                    value: e.value,
                    name: e.name,
                    description: e.description,
                })
                .collect(),
        ),
        version: m.version,
        timestamp: Some(from_time(m.timestamp.as_ref())),
        last_advertised_time: Some(from_time(m.last_advertised_time.as_ref())),
        tags,
        unit: m.unit,
        description: m.description,
        data: from_data(m.data),
        config: m.config.as_ref().map(|c| from_config_map(Some(c))),
    }
}

pub fn to_proto_metrics(ms: &[core_metric::Metric]) -> Vec<Metric> {
    ms.iter().map(to_proto_metric).collect()
}

pub fn from_proto_metrics(ms: Vec<Metric>) -> Vec<core_metric::Metric> {
    ms.into_iter().map(from_proto_metric).collect()
}

fn to_policy_rule(rule: &Rule) -> PolicyRule {
    use policy_rule::Kind;
    let kind = match rule {
        Rule::Bool(r) => Kind::BoolRule(BoolSpec { default: r.default }),
        Rule::String(r) => Kind::StringRule(StringSpec {
            default: r.default.clone(),
        }),
        Rule::Integer(r) => Kind::IntegerRule(IntegerSpec {
            default: r.default,
            minimum: r.minimum,
            maximum: r.maximum,
        }),
        Rule::Float(r) => Kind::FloatRule(FloatSpec {
            default: r.default,
            minimum: r.minimum,
            maximum: r.maximum,
        }),
    };
    PolicyRule {
        key: rule.key().to_string(),
        required: rule.required(),
        kind: Some(kind),
    }
}

fn from_policy_rule(r: PolicyRule) -> Result<Rule> {
    use policy_rule::Kind;
    let rule = match r.kind {
        Some(Kind::BoolRule(s)) => Rule::Bool(BoolRule {
            default: s.default,
            ..BoolRule::new(r.key, r.required)?
        }),
        Some(Kind::StringRule(s)) => Rule::String(StringRule {
            default: s.default,
            ..StringRule::new(r.key, r.required)?
        }),
        Some(Kind::IntegerRule(s)) => Rule::Integer(IntegerRule {
            default: s.default,
            minimum: s.minimum,
            maximum: s.maximum,
            ..IntegerRule::new(r.key, r.required)?
        }),
        Some(Kind::FloatRule(s)) => Rule::Float(FloatRule {
            default: s.default,
            minimum: s.minimum,
            maximum: s.maximum,
            ..FloatRule::new(r.key, r.required)?
        }),
        None => {
            return Err(SnapError::Decode(format!(
                "policy rule {} has no type",
                r.key
            )))
        }
    };
    Ok(rule)
}

pub fn to_policy_reply(tree: &ConfigPolicyTree) -> GetConfigPolicyReply {
    GetConfigPolicyReply {
        entries: tree
            .get_all()
            .into_iter()
            .map(|(namespace, node)| PolicyEntry {
                namespace,
                rules: node.rules().map(to_policy_rule).collect(),
            })
            .collect(),
    }
}

pub fn from_policy_reply(reply: GetConfigPolicyReply) -> Result<ConfigPolicyTree> {
    let tree = ConfigPolicyTree::new();
    for entry in reply.entries {
        let mut node = PolicyNode::new();
        for r in entry.rules {
            node.add(from_policy_rule(r)?);
        }
        tree.add(entry.namespace.as_slice(), node)?;
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn missing_times_become_now() {
        let before = Utc::now();
        let m = from_proto_metric(Metric::default());
        let ts = m.timestamp.unwrap();
        assert!(ts >= before);
        assert!(m.last_advertised_time.unwrap() >= before);
        assert_eq!(m.data, MetricData::Null);
    }

    #[test]
    fn duplicate_config_key_keeps_first_map() {
        let mut map = ConfigMap::default();
        map.int_map.insert("k".into(), 1);
        map.string_map.insert("k".into(), "x".into());
        let table = from_config_map(Some(&map));
        assert_eq!(table.get("k"), Some(&ConfigValue::Int(1)));
        assert_eq!(table.len(), 1);
    }
}
