//! Configuration policy: typed rules grouped into nodes, nodes attached to
//! namespaces in a tree.
//!
//! - [`Rule`]: one typed option (bool/string/integer/float) with required flag,
//!   default, and numeric bounds.
//! - [`PolicyNode`]: rule key -> rule at one namespace scope. Validates and
//!   defaults a [`ConfigTable`](crate::config::ConfigTable).
//! - [`ConfigPolicyTree`]: namespace trie; lookups merge every node from the
//!   root down and freeze the tree.

pub mod node;
pub mod rule;
pub mod tree;

use std::fmt;

pub use node::{PolicyNode, RuleRow};
pub use rule::{BoolRule, FloatRule, IntegerRule, Rule, StringRule};
pub use tree::ConfigPolicyTree;

/// Every problem found while processing a config table, in rule-key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingErrors {
    errors: Vec<String>,
}

impl ProcessingErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ProcessingErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config policy violations: {}", self.errors.join("; "))
    }
}

impl std::error::Error for ProcessingErrors {}
