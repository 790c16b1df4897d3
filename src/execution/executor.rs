//! The executor contract and the default single-threaded executor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::core::errors::{FlowError, Result};
use crate::graph::function_graph::FunctionGraph;
use crate::graph::traverse::UpstreamClosure;

/// Turns a requested set of output names into concrete execution.
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    /// Static check that this executor can run the graph at all.
    fn validate(&self, graph: &FunctionGraph) -> Result<()>;

    /// Runs the graph for the requested outputs. `overrides` short-circuit
    /// computation; `inputs` satisfy external nodes.
    async fn execute(
        &self,
        graph: Arc<FunctionGraph>,
        final_vars: &[String],
        overrides: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        run_id: &str,
    ) -> Result<HashMap<String, Value>>;
}

/// Validates runtime inputs against the upstream closure: every required
/// external node must be supplied, and supplied values must pass the
/// input-validation method. Failures aggregate into one sorted error.
pub fn validate_runtime_inputs(
    graph: &FunctionGraph,
    closure: &UpstreamClosure,
    inputs: &HashMap<String, Value>,
    overrides: &HashMap<String, Value>,
) -> Result<()> {
    let adapters = graph.adapters();
    let mut failures: Vec<String> = Vec::new();
    for name in &closure.user_inputs {
        if overrides.contains_key(name) {
            continue;
        }
        if let Some(value) = inputs.get(name) {
            if let Some(node) = graph.get(name) {
                if !adapters.validate_input(node, value)? {
                    failures.push(format!(
                        "input '{name}' does not match declared type {}",
                        node.node_type
                    ));
                }
            }
            continue;
        }
        if graph.config().contains_key(name) {
            continue;
        }
        failures.push(format!("required input '{name}' was not supplied"));
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(FlowError::invalid_inputs(failures))
    }
}

/// Names that arrive with a value before execution starts: config, runtime
/// inputs, and overrides.
pub fn supplied_names(
    graph: &FunctionGraph,
    inputs: &HashMap<String, Value>,
) -> HashSet<String> {
    let mut supplied: HashSet<String> = graph.config().keys().cloned().collect();
    supplied.extend(inputs.keys().cloned());
    supplied
}

/// Direct DFS execution with memoization. The common case: single-threaded,
/// fully blocking, deterministic dependency-order execution. Has no concept
/// of dynamic fan-out, so graphs with expand/collect nodes are rejected at
/// validation time.
#[derive(Debug, Default)]
pub struct DefaultGraphExecutor;

#[async_trait]
impl GraphExecutor for DefaultGraphExecutor {
    fn validate(&self, graph: &FunctionGraph) -> Result<()> {
        let dynamic: Vec<String> = graph
            .nodes()
            .filter(|node| node.is_dynamic())
            .map(|node| node.name.clone())
            .collect();
        if !dynamic.is_empty() {
            let mut names = dynamic;
            names.sort();
            return Err(FlowError::dynamic(format!(
                "the default executor cannot run expand/collect nodes ({}); use the task-based executor",
                names.join(", ")
            )));
        }
        if let Some(cycles) = graph.detect_cycles() {
            return Err(FlowError::Cycle { cycles });
        }
        Ok(())
    }

    async fn execute(
        &self,
        graph: Arc<FunctionGraph>,
        final_vars: &[String],
        overrides: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        run_id: &str,
    ) -> Result<HashMap<String, Value>> {
        let adapters = graph.adapters().clone();
        adapters
            .pre_graph_execute(run_id, &graph, final_vars, inputs, overrides)
            .await?;

        let outcome = self
            .execute_inner(&graph, final_vars, overrides, inputs, run_id)
            .await;
        match &outcome {
            Ok(results) => {
                adapters
                    .post_graph_execute(run_id, &graph, true, Some(results), None)
                    .await?;
            }
            Err(err) => {
                adapters
                    .post_graph_execute(run_id, &graph, false, None, Some(err))
                    .await?;
            }
        }
        outcome
    }
}

impl DefaultGraphExecutor {
    async fn execute_inner(
        &self,
        graph: &FunctionGraph,
        final_vars: &[String],
        overrides: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        run_id: &str,
    ) -> Result<HashMap<String, Value>> {
        let supplied = supplied_names(graph, inputs);
        let override_names: HashSet<String> = overrides.keys().cloned().collect();
        let closure = graph.get_upstream_nodes(final_vars, Some(&supplied), &override_names)?;
        validate_runtime_inputs(graph, &closure, inputs, overrides)?;
        debug!(
            run_id,
            required = closure.required.len(),
            "executing via direct DFS"
        );
        graph.execute(final_vars, overrides, inputs, run_id).await
    }
}
