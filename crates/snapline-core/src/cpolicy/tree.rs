//! Namespace trie of policy nodes.
//!
//! Inserts are legal until the first lookup; the first `get` freezes the tree.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::node::PolicyNode;
use super::ProcessingErrors;
use crate::config::ConfigTable;
use crate::error::{Result, SnapError};

#[derive(Debug, Clone, Default)]
struct Branch {
    node: Option<PolicyNode>,
    children: BTreeMap<String, Branch>,
}

impl Branch {
    fn collect(&self, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, PolicyNode)>) {
        if let Some(node) = &self.node {
            out.push((path.clone(), node.clone()));
        }
        for (seg, child) in &self.children {
            path.push(seg.clone());
            child.collect(path, out);
            path.pop();
        }
    }
}

#[derive(Default)]
pub struct ConfigPolicyTree {
    root: RwLock<Branch>,
    frozen: AtomicBool,
}

impl ConfigPolicyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `node` at `ns`, creating intermediate segments. A node already
    /// at that path is replaced. An empty namespace is ignored.
    pub fn add<S: AsRef<str>>(&self, ns: &[S], node: PolicyNode) -> Result<()> {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        if self.is_frozen() {
            return Err(SnapError::Config(
                "config policy tree is frozen; add is not allowed after get".into(),
            ));
        }
        if ns.is_empty() {
            return Ok(());
        }
        let mut cur = &mut *root;
        for seg in ns {
            cur = cur.children.entry(seg.as_ref().to_string()).or_default();
        }
        cur.node = Some(node);
        Ok(())
    }

    /// Merge every node from the root along `ns` (deeper rules overwrite
    /// shallower rules of the same key). Freezes the tree. `None` when no
    /// node lies on the path.
    pub fn get<S: AsRef<str>>(&self, ns: &[S]) -> Option<PolicyNode> {
        self.freeze();
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        let mut merged: Option<PolicyNode> = root.node.clone();
        let mut cur = &*root;
        for seg in ns {
            let Some(next) = cur.children.get(seg.as_ref()) else {
                break;
            };
            cur = next;
            if let Some(node) = &cur.node {
                merged = Some(match merged {
                    Some(m) => m.merge(node),
                    None => node.clone(),
                });
            }
        }
        merged
    }

    /// Validate `values` against the merged node for `ns`. No policy on the
    /// path means every table is accepted unchanged.
    pub fn process<S: AsRef<str>>(
        &self,
        ns: &[S],
        values: ConfigTable,
    ) -> std::result::Result<ConfigTable, ProcessingErrors> {
        match self.get(ns) {
            Some(node) => node.process(values),
            None => Ok(values),
        }
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Every populated path with its own (unmerged) node, in path order.
    pub fn get_all(&self) -> Vec<(Vec<String>, PolicyNode)> {
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        root.collect(&mut Vec::new(), &mut out);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.get_all().is_empty()
    }

    fn from_entries(entries: Vec<(Vec<String>, PolicyNode)>) -> Result<Self> {
        let tree = Self::new();
        for (ns, node) in entries {
            tree.add(ns.as_slice(), node)?;
        }
        Ok(tree)
    }
}

impl Clone for ConfigPolicyTree {
    /// The clone starts unfrozen.
    fn clone(&self) -> Self {
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        Self {
            root: RwLock::new(root.clone()),
            frozen: AtomicBool::new(false),
        }
    }
}

impl PartialEq for ConfigPolicyTree {
    fn eq(&self, other: &Self) -> bool {
        self.get_all() == other.get_all()
    }
}

impl fmt::Debug for ConfigPolicyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigPolicyTree")
            .field("frozen", &self.is_frozen())
            .field("entries", &self.get_all())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct TreeEntry {
    namespace: Vec<String>,
    node: PolicyNode,
}

impl Serialize for ConfigPolicyTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entries: Vec<TreeEntry> = self
            .get_all()
            .into_iter()
            .map(|(namespace, node)| TreeEntry { namespace, node })
            .collect();
        entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigPolicyTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = Vec::<TreeEntry>::deserialize(deserializer)?;
        ConfigPolicyTree::from_entries(
            entries
                .into_iter()
                .map(|e| (e.namespace, e.node))
                .collect(),
        )
        .map_err(serde::de::Error::custom)
    }
}
