//! PropertyTree: hierarchical configuration trie keyed by '/'-split queue
//! path segments (spec §4.1). Shape grounded on `domain-map`'s `Node<V>`
//! trie (reversed-label domain lookup), adapted to forward path segments and
//! to Pluq's merge/recurse semantics instead of domain wildcards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::retry::Retry;

/// Default retry-remaining and visibility timeout when no node on the path
/// sets them, matching `storage/message.go`'s `DefaultRetry`/`DefaultTimeout`.
pub const DEFAULT_RETRY: Retry = Retry::Limited(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Properties {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry: Option<Retry>,

    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        with = "crate::duration_fmt::option"
    )]
    pub timeout: Option<Duration>,

    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        with = "crate::duration_fmt::option"
    )]
    pub accum_time: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recurse: Option<bool>,
}

impl Properties {
    /// Merge `other` into `self`, field-by-field, `other` winning wherever
    /// it is present (spec §4.1: "present wins over absent; when both
    /// present, later (deeper) wins").
    pub fn merge_from(&mut self, other: &Properties) {
        if other.retry.is_some() {
            self.retry = other.retry;
        }
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
        if other.accum_time.is_some() {
            self.accum_time = other.accum_time;
        }
        if other.recurse.is_some() {
            self.recurse = other.recurse;
        }
    }

    pub fn effective_retry(&self) -> Retry {
        self.retry.unwrap_or(DEFAULT_RETRY)
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn effective_accum_time(&self) -> Duration {
        self.accum_time.unwrap_or(Duration::ZERO)
    }
}

struct Node {
    properties: RwLock<Option<Properties>>,
    children: RwLock<HashMap<String, Arc<Node>>>,
}

impl Node {
    fn new() -> Arc<Node> {
        Arc::new(Node {
            properties: RwLock::new(None),
            children: RwLock::new(HashMap::new()),
        })
    }
}

/// Split a queue name on '/'. An empty name yields no segments, i.e. the
/// root node itself, named `""` (spec §9 Open Question).
pub fn split_path(name: &str) -> Vec<String> {
    if name.is_empty() {
        Vec::new()
    } else {
        name.split('/').map(String::from).collect()
    }
}

pub struct PropertyTree {
    root: Arc<Node>,
}

impl Default for PropertyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyTree {
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    /// Create intermediate nodes on demand and replace the target node's
    /// Properties record.
    pub fn set(&self, segments: &[String], properties: Properties) {
        let mut current = self.root.clone();
        for seg in segments {
            let existing = current.children.read().get(seg).cloned();
            let next = match existing {
                Some(n) => n,
                None => {
                    let mut children = current.children.write();
                    children.entry(seg.clone()).or_insert_with(Node::new).clone()
                }
            };
            current = next;
        }
        *current.properties.write() = Some(properties);
    }

    fn lookup(&self, segments: &[String]) -> Option<Arc<Node>> {
        let mut current = self.root.clone();
        for seg in segments {
            let next = current.children.read().get(seg).cloned()?;
            current = next;
        }
        Some(current)
    }

    /// The node's own Properties record, with no ancestor merge applied.
    /// `None` if no node exists for the exact path.
    pub fn own_properties(&self, segments: &[String]) -> Option<Properties> {
        self.lookup(segments).map(|n| n.properties.read().clone().unwrap_or_default())
    }

    /// Walk from root, merging each existing node's Properties
    /// field-by-field, child overriding ancestor. Segments beyond the
    /// deepest existing node contribute nothing.
    pub fn resolve(&self, segments: &[String]) -> Properties {
        let mut acc = Properties::default();
        let mut current = self.root.clone();
        if let Some(p) = &*current.properties.read() {
            acc.merge_from(p);
        }
        for seg in segments {
            let next = current.children.read().get(seg).cloned();
            match next {
                Some(n) => {
                    if let Some(p) = &*n.properties.read() {
                        acc.merge_from(p);
                    }
                    current = n;
                }
                None => break,
            }
        }
        acc
    }

    /// Resolve `segments` to a list of (queue_path, merged_properties)
    /// targets. When the final node's merged `recurse` is true, every
    /// descendant is appended too, each inheriting the ancestor-merged
    /// properties and then layering its own (spec §4.1). A descendant's own
    /// `recurse` field does not gate whether it is included — only the
    /// resolved path's own `recurse` decides whether the whole subtree fans
    /// out (spec §9 Open Question: `a/b` with `recurse=false` is still a
    /// target when `a` has `recurse=true`).
    pub fn find_targets(&self, segments: &[String]) -> Vec<(String, Properties)> {
        let path = segments.join("/");
        match self.lookup(segments) {
            None => vec![(path, Properties::default())],
            Some(node) => {
                let merged = self.resolve(segments);
                let mut out = vec![(path.clone(), merged.clone())];
                if merged.recurse == Some(true) {
                    Self::collect_descendants(&node, segments.to_vec(), merged, &mut out);
                }
                out
            }
        }
    }

    fn collect_descendants(
        node: &Arc<Node>,
        prefix: Vec<String>,
        inherited: Properties,
        out: &mut Vec<(String, Properties)>,
    ) {
        for (seg, child) in node.children.read().iter() {
            let mut child_path = prefix.clone();
            child_path.push(seg.clone());
            let mut merged = inherited.clone();
            if let Some(p) = &*child.properties.read() {
                merged.merge_from(p);
            }
            out.push((child_path.join("/"), merged.clone()));
            Self::collect_descendants(child, child_path, merged, out);
        }
    }
}
