//! Configuration values handed to plugins.
//!
//! Every value is one of four scalar kinds. A key that is absent from a
//! [`ConfigTable`] is unset.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl ConfigValue {
    /// Type name used in policy tables and validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Int(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::Str(_) => "string",
            ConfigValue::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Str(v) => f.write_str(v),
            ConfigValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

/// Option name -> value. Ordered so that processing and serialization are
/// deterministic.
pub type ConfigTable = BTreeMap<String, ConfigValue>;

/// Build a [`ConfigTable`] from `(key, value)` pairs.
pub fn table<I, K, V>(items: I) -> ConfigTable
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<ConfigValue>,
{
    items
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
