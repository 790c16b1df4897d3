//! Adapter traits for the lifecycle layer.
//!
//! An adapter declares which lifecycle points it implements via
//! [`LifecycleAdapter::implements`]; the adapter set checks conformance once
//! at construction and dispatches only to declared points. Default bodies
//! mirror the engine's built-in behavior so an adapter overrides only what
//! it cares about.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::errors::{FlowError, Result};
use crate::execution::task::TaskView;
use crate::graph::function_graph::FunctionGraph;
use crate::graph::node::Node;
use crate::graph::types::{self, NodeType};

use super::points::LifecyclePoint;

/// The engine's default node execution: call the node's callable with its
/// resolved keyword arguments. This is what `do_node_execute` does unless an
/// adapter replaces it, and what replacement adapters typically delegate to.
pub fn default_node_execute(node: &Node, kwargs: &HashMap<String, Value>) -> Result<Value> {
    let compute = node.compute.as_ref().ok_or_else(|| {
        FlowError::internal(format!("node '{}' has no callable to execute", node.name))
    })?;
    compute.call(kwargs).map_err(|source| FlowError::NodeExecution {
        node: node.name.clone(),
        source,
    })
}

/// The engine's default result building: wrap the output map in a JSON
/// object, sorted by name.
pub fn default_build_result(outputs: &HashMap<String, Value>) -> Value {
    let mut map = Map::new();
    let mut names: Vec<&String> = outputs.keys().collect();
    names.sort();
    for name in names {
        map.insert(name.clone(), outputs[name].clone());
    }
    Value::Object(map)
}

/// A synchronous lifecycle adapter.
///
/// Hook signatures are the plugin contract of the engine; implementors must
/// not rely on being the only adapter registered for a hook. Methods replace
/// engine behavior outright and are exclusive per point.
pub trait LifecycleAdapter: Send + Sync {
    /// Identifies the adapter in conflict and validation messages.
    fn name(&self) -> String;

    /// The lifecycle points this adapter participates in.
    fn implements(&self) -> &'static [LifecyclePoint];

    // --- hooks ---

    fn pre_do_anything(&self) -> Result<()> {
        Ok(())
    }

    fn post_graph_construct(
        &self,
        _graph: &FunctionGraph,
        _success: bool,
        _error: Option<&FlowError>,
    ) -> Result<()> {
        Ok(())
    }

    fn pre_graph_execute(
        &self,
        _run_id: &str,
        _graph: &FunctionGraph,
        _final_vars: &[String],
        _inputs: &HashMap<String, Value>,
        _overrides: &HashMap<String, Value>,
    ) -> Result<()> {
        Ok(())
    }

    fn pre_task_execute(&self, _run_id: &str, _task: &TaskView) -> Result<()> {
        Ok(())
    }

    fn pre_node_execute(
        &self,
        _run_id: &str,
        _node: &Node,
        _kwargs: &HashMap<String, Value>,
        _task_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn post_node_execute(
        &self,
        _run_id: &str,
        _node: &Node,
        _kwargs: &HashMap<String, Value>,
        _success: bool,
        _result: Option<&Value>,
        _error: Option<&FlowError>,
        _task_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn post_task_execute(
        &self,
        _run_id: &str,
        _task: &TaskView,
        _success: bool,
        _error: Option<&FlowError>,
    ) -> Result<()> {
        Ok(())
    }

    fn post_graph_execute(
        &self,
        _run_id: &str,
        _graph: &FunctionGraph,
        _success: bool,
        _results: Option<&HashMap<String, Value>>,
        _error: Option<&FlowError>,
    ) -> Result<()> {
        Ok(())
    }

    // --- methods ---

    fn do_check_edge_types_match(&self, expected: &NodeType, actual: &NodeType) -> Result<bool> {
        Ok(types::types_match(expected, actual))
    }

    fn do_validate_input(&self, node: &Node, value: &Value) -> Result<bool> {
        Ok(types::validate_value(&node.node_type, value))
    }

    fn do_node_execute(
        &self,
        _run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
    ) -> Result<Value> {
        default_node_execute(node, kwargs)
    }

    /// Wraps the execution of a parallelizable task. `execute` runs the
    /// task's nodes with synchronous hook dispatch; the default just calls
    /// it. Replacements can add retries or ship the work elsewhere.
    fn do_remote_execute(
        &self,
        _run_id: &str,
        _task: &TaskView,
        execute: &dyn Fn() -> Result<HashMap<String, Value>>,
    ) -> Result<HashMap<String, Value>> {
        execute()
    }

    fn do_build_result(&self, outputs: &HashMap<String, Value>) -> Result<Value> {
        Ok(default_build_result(outputs))
    }

    // --- validators ---

    fn validate_node(&self, _node: &Node) -> (bool, Option<String>) {
        (true, None)
    }

    fn validate_graph(&self, _graph: &FunctionGraph) -> (bool, Option<String>) {
        (true, None)
    }
}

/// An asynchronous lifecycle adapter. A fully parallel track to the sync
/// trait: async hooks for a given point run concurrently via `join_all`, so
/// ordering between them is NOT guaranteed, unlike sync hooks which run in
/// strict registration order.
#[async_trait]
pub trait AsyncLifecycleAdapter: Send + Sync {
    fn name(&self) -> String;

    fn implements(&self) -> &'static [LifecyclePoint];

    async fn pre_do_anything(&self) -> Result<()> {
        Ok(())
    }

    async fn post_graph_construct(
        &self,
        _graph: &FunctionGraph,
        _success: bool,
        _error: Option<&FlowError>,
    ) -> Result<()> {
        Ok(())
    }

    async fn pre_graph_execute(
        &self,
        _run_id: &str,
        _graph: &FunctionGraph,
        _final_vars: &[String],
        _inputs: &HashMap<String, Value>,
        _overrides: &HashMap<String, Value>,
    ) -> Result<()> {
        Ok(())
    }

    async fn pre_task_execute(&self, _run_id: &str, _task: &TaskView) -> Result<()> {
        Ok(())
    }

    async fn pre_node_execute(
        &self,
        _run_id: &str,
        _node: &Node,
        _kwargs: &HashMap<String, Value>,
        _task_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn post_node_execute(
        &self,
        _run_id: &str,
        _node: &Node,
        _kwargs: &HashMap<String, Value>,
        _success: bool,
        _result: Option<&Value>,
        _error: Option<&FlowError>,
        _task_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    async fn post_task_execute(
        &self,
        _run_id: &str,
        _task: &TaskView,
        _success: bool,
        _error: Option<&FlowError>,
    ) -> Result<()> {
        Ok(())
    }

    async fn post_graph_execute(
        &self,
        _run_id: &str,
        _graph: &FunctionGraph,
        _success: bool,
        _results: Option<&HashMap<String, Value>>,
        _error: Option<&FlowError>,
    ) -> Result<()> {
        Ok(())
    }

    /// Async counterpart of `do_node_execute`. The only method point with an
    /// async track; the remaining methods are construction-time or
    /// scheduler-side and stay synchronous.
    async fn do_node_execute(
        &self,
        _run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
    ) -> Result<Value> {
        default_node_execute(node, kwargs)
    }
}
