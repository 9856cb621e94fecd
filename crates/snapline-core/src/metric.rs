//! Metric types exchanged between control and plugins.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigTable;

/// One namespace segment. A segment with a non-empty `name` is dynamic: its
/// `value` is filled in per collection (e.g. a host or device id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceElement {
    pub value: String,
    pub name: String,
    pub description: String,
}

impl NamespaceElement {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            name: String::new(),
            description: String::new(),
        }
    }

    /// A dynamic element: the value is a wildcard until collected.
    pub fn dynamic(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            value: "*".to_string(),
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Ordered metric namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace(pub Vec<NamespaceElement>);

impl Namespace {
    pub fn new<S: AsRef<str>>(segments: &[S]) -> Self {
        Self(
            segments
                .iter()
                .map(|s| NamespaceElement::new(s.as_ref()))
                .collect(),
        )
    }

    pub fn add_static(mut self, value: impl Into<String>) -> Self {
        self.0.push(NamespaceElement::new(value));
        self
    }

    pub fn add_dynamic(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.0.push(NamespaceElement::dynamic(name, description));
        self
    }

    pub fn strings(&self) -> Vec<String> {
        self.0.iter().map(|e| e.value.clone()).collect()
    }

    pub fn elements(&self) -> &[NamespaceElement] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Namespace {
    /// `/a/b/c`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.0 {
            write!(f, "/{}", e.value)?;
        }
        Ok(())
    }
}

/// Metric payload. Closed set: every conversion boundary matches it
/// exhaustively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum MetricData {
    String(String),
    Float32(f32),
    Float64(f64),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Bytes(Vec<u8>),
    Bool(bool),
    #[default]
    Null,
}

/// A metric (or metric type, when `data` is `Null` and no timestamp is set).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub namespace: Namespace,
    pub version: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub last_advertised_time: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
    pub unit: String,
    pub description: String,
    pub data: MetricData,
    pub config: Option<ConfigTable>,
}

impl Metric {
    pub fn new(namespace: Namespace, data: MetricData) -> Self {
        Self {
            namespace,
            data,
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, config: ConfigTable) -> Self {
        self.config = Some(config);
        self
    }

    /// Result cache key: the full namespace string.
    pub fn cache_key(&self) -> String {
        self.namespace.to_string()
    }
}
