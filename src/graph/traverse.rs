//! Traversal and query utilities over the node map.
//!
//! All traversal is iterative with an explicit stack; deep dependency chains
//! must not exhaust the call stack.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::core::errors::{FlowError, Result};

use super::node::{DependencyKind, Node};

/// Generic directional DFS: walks from `starts` following whatever edges
/// `next_edges` yields, returning every reached name (starts included).
pub fn directional_dfs<F>(starts: &[String], next_edges: F) -> HashSet<String>
where
    F: Fn(&str) -> Vec<String>,
{
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = starts.to_vec();
    while let Some(name) = stack.pop() {
        if !visited.insert(name.clone()) {
            continue;
        }
        for neighbor in next_edges(&name) {
            if !visited.contains(&neighbor) {
                stack.push(neighbor);
            }
        }
    }
    visited
}

/// Result of an upstream traversal: the nodes that must be available for the
/// requested outputs, and the subset of those that are externally supplied.
#[derive(Debug, Default, Clone)]
pub struct UpstreamClosure {
    pub required: HashSet<String>,
    pub user_inputs: HashSet<String>,
}

/// Walks dependency edges from each requested output with runtime-aware
/// pruning.
///
/// With `runtime_inputs: Some(..)` (actual execution), an OPTIONAL dependency
/// that no runtime input, config key, or override supplies is pruned: its
/// branch need not execute. With `None` (static inspection) every optional
/// dependency is traversed so the full DAG shape stays inspectable.
/// Overridden nodes are never traversed past; the override short-circuits
/// their upstream. Unknown requested names aggregate into a single error.
pub fn upstream_closure(
    nodes: &HashMap<String, Node>,
    config_keys: &HashSet<String>,
    final_vars: &[String],
    runtime_inputs: Option<&HashSet<String>>,
    overrides: &HashSet<String>,
) -> Result<UpstreamClosure> {
    let unknown: Vec<String> = final_vars
        .iter()
        .filter(|name| {
            !nodes.contains_key(*name)
                && !overrides.contains(*name)
                && !runtime_inputs.map(|ri| ri.contains(*name)).unwrap_or(false)
        })
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(FlowError::unknown_outputs(unknown));
    }

    let supplied = |name: &str| -> bool {
        overrides.contains(name)
            || config_keys.contains(name)
            || runtime_inputs.map(|ri| ri.contains(name)).unwrap_or(false)
    };

    let mut closure = UpstreamClosure::default();
    let mut stack: Vec<String> = final_vars.to_vec();
    while let Some(name) = stack.pop() {
        if !closure.required.insert(name.clone()) {
            continue;
        }
        let node = match nodes.get(&name) {
            Some(node) => node,
            // requested via overrides/inputs without a backing node
            None => {
                closure.user_inputs.insert(name);
                continue;
            }
        };
        if node.is_external() {
            closure.user_inputs.insert(name.clone());
        }
        // an override makes the node's upstream irrelevant
        if overrides.contains(&name) {
            continue;
        }
        for dep in &node.dependencies {
            let kind = node
                .input_types
                .get(dep)
                .map(|spec| spec.kind)
                .unwrap_or(DependencyKind::Required);
            if kind == DependencyKind::Optional && runtime_inputs.is_some() && !supplied(dep) {
                debug!(node = %name, dependency = %dep, "pruning unsatisfied optional dependency");
                continue;
            }
            if !closure.required.contains(dep) {
                stack.push(dep.clone());
            }
        }
    }
    Ok(closure)
}

/// Forward DFS following `depended_on_by` edges.
pub fn downstream_closure(nodes: &HashMap<String, Node>, starts: &[String]) -> HashSet<String> {
    directional_dfs(starts, |name| {
        nodes
            .get(name)
            .map(|node| node.depended_on_by.clone())
            .unwrap_or_default()
    })
}

fn as_digraph(nodes: &HashMap<String, Node>) -> (DiGraph<String, ()>, HashMap<String, NodeIndex>) {
    let mut digraph: DiGraph<String, ()> = DiGraph::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();
    let mut names: Vec<&String> = nodes.keys().collect();
    names.sort();
    for name in &names {
        let idx = digraph.add_node((*name).clone());
        index.insert((*name).clone(), idx);
    }
    for name in &names {
        let node = &nodes[*name];
        let to = index[*name];
        for dep in &node.dependencies {
            if let Some(from) = index.get(dep) {
                digraph.add_edge(*from, to, ());
            }
        }
    }
    (digraph, index)
}

/// Whether the dependency digraph contains any cycle.
pub fn is_cyclic(nodes: &HashMap<String, Node>) -> bool {
    let (digraph, _) = as_digraph(nodes);
    is_cyclic_directed(&digraph)
}

/// Reports every cycle as a sorted list of node names, via strongly
/// connected components. `None` when the graph is acyclic.
pub fn detect_cycles(nodes: &HashMap<String, Node>) -> Option<Vec<Vec<String>>> {
    let (digraph, _) = as_digraph(nodes);
    let mut cycles: Vec<Vec<String>> = tarjan_scc(&digraph)
        .into_iter()
        .filter(|scc| {
            scc.len() > 1
                || scc
                    .first()
                    .map(|idx| digraph.find_edge(*idx, *idx).is_some())
                    .unwrap_or(false)
        })
        .map(|scc| {
            let mut names: Vec<String> = scc.into_iter().map(|idx| digraph[idx].clone()).collect();
            names.sort();
            names
        })
        .collect();
    if cycles.is_empty() {
        return None;
    }
    cycles.sort();
    Some(cycles)
}
