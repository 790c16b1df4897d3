//! Partitioning of the required node set into schedulable tasks.
//!
//! The default strategy keeps every node its own task except inside an
//! expand/collect region, whose interior nodes form one repeatable block.
//! Whatever the strategy, task boundaries never split an atomic
//! fan-out/fan-in pairing.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::core::errors::{FlowError, Result};
use crate::graph::function_graph::FunctionGraph;
use crate::graph::node::NodeSource;

use super::task::{TaskPurpose, TaskSpec};

/// Pluggable partitioning of nodes into tasks.
pub trait GroupingStrategy: Send + Sync {
    fn group(&self, graph: &FunctionGraph, required: &HashSet<String>) -> Result<Vec<TaskSpec>>;
}

/// Default strategy: singleton tasks everywhere, one repeatable block per
/// expand/collect region.
#[derive(Debug, Default)]
pub struct GroupByRepeatableBlocks;

impl GroupingStrategy for GroupByRepeatableBlocks {
    fn group(&self, graph: &FunctionGraph, required: &HashSet<String>) -> Result<Vec<TaskSpec>> {
        let pairings = resolve_pairings(graph, required)?;

        // node -> owning block (expand name keys the pairing)
        let mut block_of: HashMap<String, usize> = HashMap::new();
        for (i, pairing) in pairings.iter().enumerate() {
            for member in &pairing.members {
                if block_of.insert(member.clone(), i).is_some() {
                    return Err(FlowError::dynamic(format!(
                        "node '{member}' belongs to more than one expand/collect region"
                    )));
                }
            }
        }

        let mut specs: Vec<TaskSpec> = Vec::new();
        let mut task_of: HashMap<String, String> = HashMap::new();

        let mut names: Vec<&String> = required.iter().collect();
        names.sort();
        for name in &names {
            let node = graph.get(name).ok_or_else(|| {
                FlowError::internal(format!("required node '{name}' not in graph"))
            })?;
            if block_of.contains_key(*name) {
                continue;
            }
            // externally supplied values are cache-seeded, not scheduled
            if node.compute.is_none() {
                continue;
            }
            let (id, purpose) = match node.source {
                NodeSource::Expand => (format!("expand:{name}"), TaskPurpose::Expand {
                    node: (*name).clone(),
                }),
                NodeSource::Collect => {
                    let pairing = pairings
                        .iter()
                        .find(|p| &p.collect == *name)
                        .ok_or_else(|| {
                            FlowError::dynamic(format!(
                                "collect node '{name}' has no expand pairing"
                            ))
                        })?;
                    (
                        format!("collect:{name}"),
                        TaskPurpose::Collect {
                            node: (*name).clone(),
                            expand_task: format!("expand:{}", pairing.expand),
                        },
                    )
                }
                _ => (format!("task:{name}"), TaskPurpose::Standard),
            };
            task_of.insert((*name).clone(), id.clone());
            specs.push(TaskSpec {
                id,
                nodes: vec![(*name).clone()],
                dependencies: Vec::new(),
                purpose,
            });
        }

        for pairing in &pairings {
            let id = format!("block:{}->{}", pairing.expand, pairing.collect);
            for member in &pairing.members {
                task_of.insert(member.clone(), id.clone());
            }
            specs.push(TaskSpec {
                id,
                nodes: topo_order(graph, &pairing.members)?,
                dependencies: Vec::new(),
                purpose: TaskPurpose::Block {
                    expand_node: pairing.expand.clone(),
                    collect_node: pairing.collect.clone(),
                    sinks: pairing.sinks.clone(),
                },
            });
        }

        // task-level edges from node-level edges crossing task boundaries
        for spec in &mut specs {
            let mut deps: Vec<String> = Vec::new();
            for node_name in &spec.nodes {
                let node = graph
                    .get(node_name)
                    .ok_or_else(|| FlowError::internal(format!("node '{node_name}' missing")))?;
                for dep in &node.dependencies {
                    if let Some(dep_task) = task_of.get(dep) {
                        if dep_task != &spec.id && !deps.contains(dep_task) {
                            deps.push(dep_task.clone());
                        }
                    }
                }
            }
            deps.sort();
            spec.dependencies = deps;
        }

        debug!(tasks = specs.len(), blocks = pairings.len(), "node set grouped into tasks");
        Ok(specs)
    }
}

struct Pairing {
    expand: String,
    collect: String,
    /// Nodes strictly between the expand and the collect.
    members: Vec<String>,
    /// Block nodes whose outputs the collect gathers.
    sinks: Vec<String>,
}

/// Resolves every collect node to exactly one expand-rooted branch and
/// computes the block interiors. Malformed pairings are reported before any
/// execution starts.
fn resolve_pairings(graph: &FunctionGraph, required: &HashSet<String>) -> Result<Vec<Pairing>> {
    let mut pairings: Vec<Pairing> = Vec::new();
    let mut claimed_expands: HashSet<String> = HashSet::new();

    let mut collect_names: Vec<&String> = required
        .iter()
        .filter(|name| {
            graph
                .get(name)
                .map(|n| n.source == NodeSource::Collect)
                .unwrap_or(false)
        })
        .collect();
    collect_names.sort();

    for collect_name in collect_names {
        let collect = graph.get(collect_name).expect("filtered above");
        let sinks: Vec<String> = collect
            .collected_params()
            .iter()
            .map(|(param, _)| (*param).clone())
            .collect();
        if sinks.is_empty() {
            return Err(FlowError::dynamic(format!(
                "collect node '{collect_name}' has no Collected parameter"
            )));
        }

        // walk upstream from each sink until an expand node
        let mut expands: HashSet<String> = HashSet::new();
        for sink in &sinks {
            let upstream = crate::graph::traverse::directional_dfs(&[sink.clone()], |name| {
                match graph.get(name) {
                    Some(node) if node.source == NodeSource::Expand => Vec::new(),
                    Some(node) => node.dependencies.clone(),
                    None => Vec::new(),
                }
            });
            for name in &upstream {
                if graph
                    .get(name)
                    .map(|n| n.source == NodeSource::Expand)
                    .unwrap_or(false)
                {
                    expands.insert(name.clone());
                }
            }
        }
        if expands.len() != 1 {
            return Err(FlowError::dynamic(format!(
                "collect node '{collect_name}' must trace back to exactly one expand node, found {}",
                expands.len()
            )));
        }
        let expand = expands.into_iter().next().expect("len checked");
        if !claimed_expands.insert(expand.clone()) {
            return Err(FlowError::dynamic(format!(
                "expand node '{expand}' feeds more than one collect node"
            )));
        }

        // interior: downstream of the expand AND upstream of a sink,
        // excluding both endpoints
        let downstream = graph.get_downstream_nodes(&[expand.clone()]);
        let upstream_of_sinks =
            crate::graph::traverse::directional_dfs(&sinks, |name| {
                graph.get(name).map(|n| n.dependencies.clone()).unwrap_or_default()
            });
        let mut members: Vec<String> = downstream
            .intersection(&upstream_of_sinks)
            .filter(|name| *name != &expand && *name != collect_name)
            .cloned()
            .collect();
        members.sort();
        if members.is_empty() {
            return Err(FlowError::dynamic(format!(
                "no nodes between expand '{expand}' and collect '{collect_name}'"
            )));
        }
        for member in &members {
            let node = graph.get(member).ok_or_else(|| {
                FlowError::internal(format!("block member '{member}' not in graph"))
            })?;
            if node.is_dynamic() {
                return Err(FlowError::dynamic(format!(
                    "nested expand/collect at '{member}' is not supported"
                )));
            }
        }

        pairings.push(Pairing {
            expand,
            collect: collect_name.clone(),
            members,
            sinks,
        });
    }

    // every required expand must have found its collect
    for name in required {
        if graph
            .get(name)
            .map(|n| n.source == NodeSource::Expand)
            .unwrap_or(false)
            && !claimed_expands.contains(name)
        {
            return Err(FlowError::dynamic(format!(
                "expand node '{name}' has no downstream collect node"
            )));
        }
    }

    Ok(pairings)
}

/// Kahn's algorithm over a node subset, breaking ties by name for
/// deterministic task layouts.
fn topo_order(graph: &FunctionGraph, members: &[String]) -> Result<Vec<String>> {
    let member_set: HashSet<&String> = members.iter().collect();
    let mut in_degree: HashMap<&String, usize> = HashMap::new();
    let mut dependents: HashMap<&String, Vec<&String>> = HashMap::new();
    for name in members {
        let node = graph
            .get(name)
            .ok_or_else(|| FlowError::internal(format!("node '{name}' missing")))?;
        let degree = node
            .dependencies
            .iter()
            .filter(|dep| member_set.contains(dep))
            .count();
        in_degree.insert(name, degree);
        for dep in &node.dependencies {
            if let Some(dep_key) = member_set.get(dep) {
                dependents.entry(*dep_key).or_default().push(name);
            }
        }
    }

    let mut ready: VecDeque<&String> = {
        let mut zero: Vec<&String> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        zero.sort();
        zero.into()
    };
    let mut order: Vec<String> = Vec::new();
    while let Some(name) = ready.pop_front() {
        order.push(name.clone());
        if let Some(children) = dependents.get(name) {
            let mut newly_ready: Vec<&String> = Vec::new();
            for child in children {
                let degree = in_degree
                    .get_mut(child)
                    .ok_or_else(|| FlowError::internal("topo bookkeeping out of sync"))?;
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(child);
                }
            }
            newly_ready.sort();
            for child in newly_ready {
                ready.push_back(child);
            }
        }
    }
    if order.len() != members.len() {
        return Err(FlowError::Cycle {
            cycles: vec![members.to_vec()],
        });
    }
    Ok(order)
}
