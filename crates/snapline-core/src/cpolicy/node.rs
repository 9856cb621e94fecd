//! Policy node: the rules that apply at one namespace scope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::rule::Rule;
use super::ProcessingErrors;
use crate::config::{ConfigTable, ConfigValue};

/// Rule key -> rule. Keys are ordered, so processing visits rules (and
/// reports errors) in the same order every time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyNode {
    rules: BTreeMap<String, Rule>,
}

/// One row of [`PolicyNode::rules_table`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuleRow {
    pub name: String,
    pub type_name: &'static str,
    pub default: Option<ConfigValue>,
    pub required: bool,
    pub minimum: Option<ConfigValue>,
    pub maximum: Option<ConfigValue>,
}

impl PolicyNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, replacing any rule with the same key.
    pub fn add(&mut self, rule: impl Into<Rule>) {
        let rule = rule.into();
        self.rules.insert(rule.key().to_string(), rule);
    }

    pub fn with(mut self, rule: impl Into<Rule>) -> Self {
        self.add(rule);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Rule> {
        self.rules.get(key)
    }

    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    /// Defaults of every rule that declares one.
    pub fn defaults(&self) -> ConfigTable {
        self.rules
            .iter()
            .filter_map(|(k, r)| r.default_value().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Validate `values` against every rule.
    ///
    /// Present keys are type/bound checked; missing required keys are errors;
    /// missing optional keys take their default. A required rule's default is
    /// never applied. Checking continues past the first problem so the caller
    /// sees all of them.
    pub fn process(&self, mut values: ConfigTable) -> Result<ConfigTable, ProcessingErrors> {
        let mut errs = ProcessingErrors::new();
        for (key, rule) in &self.rules {
            match values.get(key) {
                Some(v) => {
                    if let Err(e) = rule.validate(v) {
                        errs.add(e);
                    }
                }
                None if rule.required() => {
                    errs.add(format!("required key missing ({key})"));
                }
                None => {
                    if let Some(def) = rule.default_value() {
                        values.insert(key.clone(), def);
                    }
                }
            }
        }
        if errs.has_errors() {
            return Err(errs);
        }
        Ok(values)
    }

    /// Fill defaults of optional rules into `values`. A key that already has a
    /// value is an error: defaults never overwrite.
    pub fn add_defaults(&self, mut values: ConfigTable) -> Result<ConfigTable, ProcessingErrors> {
        let mut errs = ProcessingErrors::new();
        for (key, rule) in &self.rules {
            if values.contains_key(key) {
                errs.add(format!(
                    "the key \"{key}\" already has a default policy for this plugin"
                ));
                continue;
            }
            if !rule.required() {
                if let Some(def) = rule.default_value() {
                    values.insert(key.clone(), def);
                }
            }
        }
        if errs.has_errors() {
            return Err(errs);
        }
        Ok(values)
    }

    /// New node holding this node's rules overlaid with `deeper`'s.
    pub fn merge(&self, deeper: &PolicyNode) -> PolicyNode {
        let mut out = self.clone();
        for (k, r) in &deeper.rules {
            out.rules.insert(k.clone(), r.clone());
        }
        out
    }

    pub fn rules_table(&self) -> Vec<RuleRow> {
        self.rules
            .iter()
            .map(|(name, r)| RuleRow {
                name: name.clone(),
                type_name: r.type_name(),
                default: r.default_value(),
                required: r.required(),
                minimum: r.minimum(),
                maximum: r.maximum(),
            })
            .collect()
    }
}
