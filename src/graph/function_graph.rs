//! The dependency graph: sole authority for node identity within a run.
//!
//! Construction lives in [`crate::graph::build`]; this module owns lookup,
//! traversal, and the memoized depth-first execution used by the default
//! executor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::core::errors::{FlowError, Result};
use crate::lifecycle::adapter_set::LifecycleAdapterSet;

use super::node::{DependencyKind, Node};
use super::traverse::{self, UpstreamClosure};

/// An immutable dependency graph over named nodes, plus the configuration
/// that can satisfy inputs, and the lifecycle adapters that wrap execution.
/// Edge lists are frozen once construction hands the graph over.
#[derive(Clone, Debug)]
pub struct FunctionGraph {
    nodes: HashMap<String, Node>,
    config: HashMap<String, Value>,
    adapters: Arc<LifecycleAdapterSet>,
}

impl FunctionGraph {
    /// Assembles a graph from already-wired parts. Normal entry point is
    /// [`crate::graph::build::build_function_graph`]; tests use this for
    /// manual edge injection.
    pub fn from_parts(
        nodes: HashMap<String, Node>,
        config: HashMap<String, Value>,
        adapters: Arc<LifecycleAdapterSet>,
    ) -> Self {
        Self {
            nodes,
            config,
            adapters,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_map(&self) -> &HashMap<String, Node> {
        &self.nodes
    }

    pub fn config(&self) -> &HashMap<String, Value> {
        &self.config
    }

    pub fn adapters(&self) -> &Arc<LifecycleAdapterSet> {
        &self.adapters
    }

    /// Whether the graph contains any dynamic fan-out/fan-in node.
    pub fn has_dynamic_nodes(&self) -> bool {
        self.nodes.values().any(|node| node.is_dynamic())
    }

    /// Upstream closure of the requested outputs with runtime-aware pruning;
    /// see [`traverse::upstream_closure`] for the exact semantics.
    pub fn get_upstream_nodes(
        &self,
        final_vars: &[String],
        runtime_inputs: Option<&HashSet<String>>,
        overrides: &HashSet<String>,
    ) -> Result<UpstreamClosure> {
        let config_keys: HashSet<String> = self.config.keys().cloned().collect();
        traverse::upstream_closure(&self.nodes, &config_keys, final_vars, runtime_inputs, overrides)
    }

    /// Forward closure following `depended_on_by` edges.
    pub fn get_downstream_nodes(&self, names: &[String]) -> HashSet<String> {
        traverse::downstream_closure(&self.nodes, names)
    }

    pub fn is_cyclic(&self) -> bool {
        traverse::is_cyclic(&self.nodes)
    }

    pub fn detect_cycles(&self) -> Option<Vec<Vec<String>>> {
        traverse::detect_cycles(&self.nodes)
    }

    /// Executes the requested outputs with an in-order, memoized,
    /// explicit-stack DFS. The result map is seeded from config, then
    /// `inputs`, then `overrides` (later wins), so a node can be "computed"
    /// by simply being supplied. Lifecycle node hooks and the node-execution
    /// method wrap every node actually executed.
    pub async fn execute(
        &self,
        final_vars: &[String],
        overrides: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        run_id: &str,
    ) -> Result<HashMap<String, Value>> {
        let mut results: HashMap<String, Value> = HashMap::new();
        for (key, value) in &self.config {
            results.insert(key.clone(), value.clone());
        }
        for (key, value) in inputs {
            results.insert(key.clone(), value.clone());
        }
        for (key, value) in overrides {
            results.insert(key.clone(), value.clone());
        }

        let mut supplied: HashSet<String> = self.config.keys().cloned().collect();
        supplied.extend(inputs.keys().cloned());
        let override_names: HashSet<String> = overrides.keys().cloned().collect();
        let closure =
            self.get_upstream_nodes(final_vars, Some(&supplied), &override_names)?;

        // (name, dependencies_scheduled): post-order over the required set
        let mut stack: Vec<(String, bool)> = final_vars
            .iter()
            .rev()
            .map(|name| (name.clone(), false))
            .collect();
        let mut scheduled: HashSet<String> = HashSet::new();

        while let Some((name, expanded)) = stack.pop() {
            if results.contains_key(&name) {
                continue;
            }
            let node = self.nodes.get(&name).ok_or_else(|| {
                FlowError::internal(format!("node '{name}' disappeared during execution"))
            })?;
            if !expanded {
                if !scheduled.insert(name.clone()) {
                    // revisiting a node whose dependencies were already
                    // scheduled but which never resolved: a cycle
                    let cycles = self.detect_cycles().unwrap_or_default();
                    return Err(FlowError::Cycle { cycles });
                }
                stack.push((name.clone(), true));
                for dep in &node.dependencies {
                    if !results.contains_key(dep) && closure.required.contains(dep) {
                        stack.push((dep.clone(), false));
                    }
                }
                continue;
            }

            if node.compute.is_none() {
                // external or prior-run node with no seeded value; input
                // validation should have caught this earlier
                return Err(FlowError::invalid_inputs(vec![format!(
                    "required input '{name}' was not supplied"
                )]));
            }
            let kwargs = resolve_kwargs(node, &results)?;
            let value =
                execute_single_node(&self.adapters, run_id, node, &kwargs, None).await?;
            debug!(run_id, node = %name, "node value memoized");
            results.insert(name, value);
        }

        Ok(results
            .into_iter()
            .filter(|(name, _)| final_vars.contains(name))
            .collect())
    }
}

/// Builds the keyword arguments for a node from already-computed values,
/// falling back to declared defaults for unsatisfied optional parameters.
pub fn resolve_kwargs(node: &Node, available: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
    let mut kwargs = HashMap::new();
    for (param, spec) in &node.input_types {
        if let Some(value) = available.get(param) {
            kwargs.insert(param.clone(), value.clone());
        } else if spec.kind == DependencyKind::Optional {
            if let Some(default) = &spec.default {
                kwargs.insert(param.clone(), default.clone());
            }
        } else {
            return Err(FlowError::internal(format!(
                "no value available for required parameter '{param}' of node '{}'",
                node.name
            )));
        }
    }
    Ok(kwargs)
}

/// Runs one node through the full lifecycle: `pre_node_execute` hooks, the
/// `do_node_execute` method (or engine default), `post_node_execute` hooks.
/// Post hooks still fire on failure, with the error attached; the error is
/// never swallowed here.
pub async fn execute_single_node(
    adapters: &LifecycleAdapterSet,
    run_id: &str,
    node: &Node,
    kwargs: &HashMap<String, Value>,
    task_id: Option<&str>,
) -> Result<Value> {
    adapters.pre_node_execute(run_id, node, kwargs, task_id).await?;
    match adapters.execute_node(run_id, node, kwargs).await {
        Ok(value) => {
            adapters
                .post_node_execute(run_id, node, kwargs, true, Some(&value), None, task_id)
                .await?;
            Ok(value)
        }
        Err(err) => {
            adapters
                .post_node_execute(run_id, node, kwargs, false, None, Some(&err), task_id)
                .await?;
            Err(err)
        }
    }
}

/// Sync twin of [`execute_single_node`], used inside `do_remote_execute`
/// wrappers where only the synchronous adapter track participates.
pub fn execute_single_node_sync(
    adapters: &LifecycleAdapterSet,
    run_id: &str,
    node: &Node,
    kwargs: &HashMap<String, Value>,
    task_id: Option<&str>,
) -> Result<Value> {
    adapters.pre_node_execute_sync(run_id, node, kwargs, task_id)?;
    match adapters.execute_node_sync(run_id, node, kwargs) {
        Ok(value) => {
            adapters.post_node_execute_sync(run_id, node, kwargs, true, Some(&value), None, task_id)?;
            Ok(value)
        }
        Err(err) => {
            adapters.post_node_execute_sync(run_id, node, kwargs, false, None, Some(&err), task_id)?;
            Err(err)
        }
    }
}
