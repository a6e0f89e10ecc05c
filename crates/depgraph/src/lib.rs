//! Proto import-graph construction, pruning, and topological layering.
//!
//! **Core Types**:
//! - [`ImportGraph`]: node = logical proto file name, edge = "imports".
//!   Built verbatim from descriptor metadata — the descriptor already encodes
//!   resolved logical names, so no search-path resolution happens here.
//! - [`layer::layer`]: Kahn's algorithm generalized to layers; the unit of
//!   intra-stage parallelism downstream.
//!
//! **Determinism**: the graph is backed by `BTreeMap`/`BTreeSet` and every
//! layer boundary sorts its candidates, so two runs over the same descriptor
//! artifact produce identical graphs and identical layer orders. Build
//! reproducibility depends on this; it is not a style choice.

pub mod layer;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Errors from graph construction and layering.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    /// A file declared an import of itself — malformed input, never a no-op.
    #[error("malformed graph: `{0}` imports itself")]
    SelfImport(String),

    /// Layering exhausted all zero-dependency candidates with nodes left
    /// over. The payload is the exact unresolved node set so operators can
    /// pinpoint the offending imports.
    #[error("dependency cycle among: {}", .remaining.join(", "))]
    Cycle { remaining: Vec<String> },
}

/// Directed import graph over logical proto file names.
///
/// Edges point from dependent to dependency: `imports["b.proto"]` is the set
/// of files `b.proto` imports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportGraph {
    imports: BTreeMap<String, BTreeSet<String>>,
}

impl ImportGraph {
    /// Builds the graph from `(file name, declared imports)` pairs, taken
    /// verbatim from descriptor metadata.
    pub fn from_descriptors<'a, I, D>(descriptors: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let mut imports: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, deps) in descriptors {
            let entry = imports.entry(name.to_string()).or_default();
            for dep in deps {
                if dep == name {
                    return Err(GraphError::SelfImport(name.to_string()));
                }
                entry.insert(dep.to_string());
            }
        }
        Ok(Self { imports })
    }

    pub fn contains(&self, node: &str) -> bool {
        self.imports.contains_key(node)
    }

    /// Direct imports of `node`, or `None` if the node is absent.
    pub fn imports_of(&self, node: &str) -> Option<&BTreeSet<String>> {
        self.imports.get(node)
    }

    /// Nodes in lexicographic order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.imports.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    /// All nodes transitively reachable from `roots` via import edges, roots
    /// included. Edge targets absent from the graph are still reported — the
    /// caller decides whether they are externally satisfied or an error.
    pub fn reachable_from<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        for root in roots {
            if seen.insert(root.to_string()) {
                queue.push_back(root.to_string());
            }
        }

        // BFS over outgoing import edges.
        while let Some(node) = queue.pop_front() {
            if let Some(deps) = self.imports.get(&node) {
                for dep in deps {
                    if seen.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }

        seen
    }

    /// Restricts the graph to `keep`, additionally dropping nodes matching
    /// `exclude`, and prunes every edge whose target was dropped.
    ///
    /// Edges to dropped targets are removed silently, not treated as errors:
    /// a kept node may legitimately import an excluded infrastructure file
    /// (e.g. a well-known schema) that an external library satisfies at link
    /// time. The result never contains a dangling edge.
    pub fn filter(&self, keep: &BTreeSet<String>, exclude: impl Fn(&str) -> bool) -> ImportGraph {
        let kept: BTreeSet<&str> = self
            .imports
            .keys()
            .map(String::as_str)
            .filter(|n| keep.contains(*n) && !exclude(n))
            .collect();

        let mut imports: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for &node in &kept {
            let deps = self.imports[node]
                .iter()
                .filter(|d| kept.contains(d.as_str()))
                .cloned()
                .collect();
            imports.insert(node.to_string(), deps);
        }
        ImportGraph { imports }
    }
}
