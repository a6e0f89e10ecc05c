//! Topological layering scheduler.
//!
//! Kahn's algorithm generalized to emit layers instead of a single order:
//! every node in layer `i` has all of its dependencies in layers `< i`, so
//! all nodes within one layer are mutually independent and may be processed
//! concurrently. Layer 0 is exactly the zero-dependency nodes.

use crate::{GraphError, ImportGraph};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Computes the ordered layer sequence for `graph`, or fails with the exact
/// unresolved node set when the graph is not a DAG.
///
/// # Determinism
/// Candidates at every layer boundary are sorted lexicographically. Scheduling
/// must be reproducible across runs and across worker counts, so iteration
/// order of hashing collections never leaks into the result.
///
/// # Edge cases
/// An empty graph yields zero layers. A node with no dependencies and no
/// dependents lands in layer 0 like any other independent node.
pub fn layer(graph: &ImportGraph) -> Result<Vec<Vec<String>>, GraphError> {
    // Mirror the ImportGraph into petgraph so dependents (reverse edges) are
    // cheap to walk. Edge direction: dependent -> dependency.
    let mut dag: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(graph.len());

    for node in graph.nodes() {
        let idx = dag.add_node(node);
        index.insert(node, idx);
    }
    for node in graph.nodes() {
        let from = index[node];
        for dep in graph.imports_of(node).into_iter().flatten() {
            // Edges to nodes outside the graph were pruned by filter(); any
            // remaining target is guaranteed present.
            if let Some(&to) = index.get(dep.as_str()) {
                dag.add_edge(from, to, ());
            }
        }
    }

    // deps_remaining[n] = count of n's dependencies not yet placed.
    let mut deps_remaining: HashMap<NodeIndex, usize> = dag
        .node_indices()
        .map(|idx| (idx, dag.edges_directed(idx, Direction::Outgoing).count()))
        .collect();

    let mut ready: Vec<NodeIndex> = dag
        .node_indices()
        .filter(|idx| deps_remaining[idx] == 0)
        .collect();
    ready.sort_by_key(|idx| dag[*idx]);

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut placed = 0usize;

    while !ready.is_empty() {
        let wave = std::mem::take(&mut ready);
        placed += wave.len();

        // Releasing a dependency unblocks its dependents (incoming edges).
        for &done in &wave {
            for dependent in dag.neighbors_directed(done, Direction::Incoming) {
                if let Some(c) = deps_remaining.get_mut(&dependent) {
                    *c -= 1;
                    if *c == 0 {
                        ready.push(dependent);
                    }
                }
            }
        }
        ready.sort_by_key(|idx| dag[*idx]);

        layers.push(wave.iter().map(|idx| dag[*idx].to_string()).collect());
    }

    if placed < dag.node_count() {
        let mut remaining: Vec<String> = dag
            .node_indices()
            .filter(|idx| deps_remaining[idx] > 0)
            .map(|idx| dag[idx].to_string())
            .collect();
        remaining.sort();
        return Err(GraphError::Cycle { remaining });
    }

    Ok(layers)
}
