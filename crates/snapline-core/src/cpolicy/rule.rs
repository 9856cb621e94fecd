//! Typed policy rules.
//!
//! A rule's default always has the rule's own type: the variant carries a
//! typed default rather than a loose value.

use serde::{Deserialize, Serialize};

use crate::config::ConfigValue;
use crate::error::{Result, SnapError};

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SnapError::Config("rule key must not be empty".into()));
    }
    Ok(())
}

fn wrong_type(key: &str, wanted: &str, provided: &ConfigValue) -> String {
    format!(
        "type mismatch ({key} wanted type '{wanted}' but provided type '{}')",
        provided.type_name()
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolRule {
    pub key: String,
    pub required: bool,
    pub default: Option<bool>,
}

impl BoolRule {
    pub fn new(key: impl Into<String>, required: bool) -> Result<Self> {
        let key = key.into();
        check_key(&key)?;
        Ok(Self {
            key,
            required,
            default: None,
        })
    }

    pub fn with_default(mut self, v: bool) -> Self {
        self.default = Some(v);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringRule {
    pub key: String,
    pub required: bool,
    pub default: Option<String>,
}

impl StringRule {
    pub fn new(key: impl Into<String>, required: bool) -> Result<Self> {
        let key = key.into();
        check_key(&key)?;
        Ok(Self {
            key,
            required,
            default: None,
        })
    }

    pub fn with_default(mut self, v: impl Into<String>) -> Self {
        self.default = Some(v.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegerRule {
    pub key: String,
    pub required: bool,
    pub default: Option<i64>,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
}

impl IntegerRule {
    pub fn new(key: impl Into<String>, required: bool) -> Result<Self> {
        let key = key.into();
        check_key(&key)?;
        Ok(Self {
            key,
            required,
            default: None,
            minimum: None,
            maximum: None,
        })
    }

    pub fn with_default(mut self, v: i64) -> Self {
        self.default = Some(v);
        self
    }

    pub fn with_minimum(mut self, v: i64) -> Self {
        self.minimum = Some(v);
        self
    }

    pub fn with_maximum(mut self, v: i64) -> Self {
        self.maximum = Some(v);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatRule {
    pub key: String,
    pub required: bool,
    pub default: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl FloatRule {
    pub fn new(key: impl Into<String>, required: bool) -> Result<Self> {
        let key = key.into();
        check_key(&key)?;
        Ok(Self {
            key,
            required,
            default: None,
            minimum: None,
            maximum: None,
        })
    }

    pub fn with_default(mut self, v: f64) -> Self {
        self.default = Some(v);
        self
    }

    pub fn with_minimum(mut self, v: f64) -> Self {
        self.minimum = Some(v);
        self
    }

    pub fn with_maximum(mut self, v: f64) -> Self {
        self.maximum = Some(v);
        self
    }
}

/// One typed policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    Bool(BoolRule),
    String(StringRule),
    Integer(IntegerRule),
    Float(FloatRule),
}

impl Rule {
    pub fn key(&self) -> &str {
        match self {
            Rule::Bool(r) => &r.key,
            Rule::String(r) => &r.key,
            Rule::Integer(r) => &r.key,
            Rule::Float(r) => &r.key,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            Rule::Bool(r) => r.required,
            Rule::String(r) => r.required,
            Rule::Integer(r) => r.required,
            Rule::Float(r) => r.required,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Rule::Bool(_) => "bool",
            Rule::String(_) => "string",
            Rule::Integer(_) => "integer",
            Rule::Float(_) => "float",
        }
    }

    pub fn default_value(&self) -> Option<ConfigValue> {
        match self {
            Rule::Bool(r) => r.default.map(ConfigValue::Bool),
            Rule::String(r) => r.default.clone().map(ConfigValue::Str),
            Rule::Integer(r) => r.default.map(ConfigValue::Int),
            Rule::Float(r) => r.default.map(ConfigValue::Float),
        }
    }

    pub fn minimum(&self) -> Option<ConfigValue> {
        match self {
            Rule::Integer(r) => r.minimum.map(ConfigValue::Int),
            Rule::Float(r) => r.minimum.map(ConfigValue::Float),
            Rule::Bool(_) | Rule::String(_) => None,
        }
    }

    pub fn maximum(&self) -> Option<ConfigValue> {
        match self {
            Rule::Integer(r) => r.maximum.map(ConfigValue::Int),
            Rule::Float(r) => r.maximum.map(ConfigValue::Float),
            Rule::Bool(_) | Rule::String(_) => None,
        }
    }

    /// Type and bounds check. Integer rules also take float values (numbers
    /// may arrive through JSON as floats) and compare them numerically.
    pub fn validate(&self, value: &ConfigValue) -> std::result::Result<(), String> {
        match (self, value) {
            (Rule::Bool(_), ConfigValue::Bool(_)) => Ok(()),
            (Rule::String(_), ConfigValue::Str(_)) => Ok(()),
            (Rule::Integer(r), ConfigValue::Int(v)) => {
                if let Some(min) = r.minimum {
                    if *v < min {
                        return Err(format!(
                            "value is under minimum ({} value {v} < {min})",
                            r.key
                        ));
                    }
                }
                if let Some(max) = r.maximum {
                    if *v > max {
                        return Err(format!(
                            "value is over maximum ({} value {v} > {max})",
                            r.key
                        ));
                    }
                }
                Ok(())
            }
            (Rule::Integer(r), ConfigValue::Float(v)) => {
                if let Some(min) = r.minimum {
                    if *v < min as f64 {
                        return Err(format!(
                            "value is under minimum ({} value {v} < {min})",
                            r.key
                        ));
                    }
                }
                if let Some(max) = r.maximum {
                    if *v > max as f64 {
                        return Err(format!(
                            "value is over maximum ({} value {v} > {max})",
                            r.key
                        ));
                    }
                }
                Ok(())
            }
            (Rule::Float(r), ConfigValue::Float(v)) => {
                if let Some(min) = r.minimum {
                    if *v < min {
                        return Err(format!(
                            "value is under minimum ({} value {v:.6} < {min:.6})",
                            r.key
                        ));
                    }
                }
                if let Some(max) = r.maximum {
                    if *v > max {
                        return Err(format!(
                            "value is over maximum ({} value {v:.6} > {max:.6})",
                            r.key
                        ));
                    }
                }
                Ok(())
            }
            (rule, other) => Err(wrong_type(rule.key(), rule.type_name(), other)),
        }
    }
}

impl From<BoolRule> for Rule {
    fn from(r: BoolRule) -> Self {
        Rule::Bool(r)
    }
}

impl From<StringRule> for Rule {
    fn from(r: StringRule) -> Self {
        Rule::String(r)
    }
}

impl From<IntegerRule> for Rule {
    fn from(r: IntegerRule) -> Self {
        Rule::Integer(r)
    }
}

impl From<FloatRule> for Rule {
    fn from(r: FloatRule) -> Self {
        Rule::Float(r)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn integer_bounds() {
        let r: Rule = IntegerRule::new("port", true)
            .unwrap()
            .with_minimum(1)
            .with_maximum(10)
            .into();
        assert!(r.validate(&ConfigValue::Int(5)).is_ok());
        assert_eq!(
            r.validate(&ConfigValue::Int(0)).unwrap_err(),
            "value is under minimum (port value 0 < 1)"
        );
        assert_eq!(
            r.validate(&ConfigValue::Int(11)).unwrap_err(),
            "value is over maximum (port value 11 > 10)"
        );
        assert!(r.validate(&ConfigValue::Float(3.0)).is_ok());
        assert!(r.validate(&ConfigValue::Float(10.5)).is_err());
    }

    #[test]
    fn float_rejects_integer() {
        let r: Rule = FloatRule::new("ratio", false).unwrap().into();
        let err = r.validate(&ConfigValue::Int(1)).unwrap_err();
        assert_eq!(
            err,
            "type mismatch (ratio wanted type 'float' but provided type 'integer')"
        );
    }

    #[test]
    fn empty_key_rejected() {
        assert!(StringRule::new("", true).is_err());
    }
}
