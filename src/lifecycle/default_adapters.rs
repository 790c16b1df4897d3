//! Stock adapters shipped with the engine.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::core::errors::{FlowError, Result};
use crate::execution::task::TaskView;
use crate::graph::function_graph::FunctionGraph;
use crate::graph::node::Node;

use super::adapter::{default_node_execute, LifecycleAdapter};
use super::points::LifecyclePoint;

/// Logs every lifecycle event through `tracing`. Stacks freely with other
/// hook adapters.
#[derive(Debug, Default)]
pub struct TracingHook;

impl LifecycleAdapter for TracingHook {
    fn name(&self) -> String {
        "TracingHook".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &LifecyclePoint::HOOKS
    }

    fn pre_do_anything(&self) -> Result<()> {
        debug!("driver initializing");
        Ok(())
    }

    fn post_graph_construct(
        &self,
        graph: &FunctionGraph,
        success: bool,
        error: Option<&FlowError>,
    ) -> Result<()> {
        if success {
            info!(nodes = graph.len(), "graph constructed");
        } else {
            error!(error = ?error, "graph construction failed");
        }
        Ok(())
    }

    fn pre_graph_execute(
        &self,
        run_id: &str,
        _graph: &FunctionGraph,
        final_vars: &[String],
        inputs: &HashMap<String, Value>,
        overrides: &HashMap<String, Value>,
    ) -> Result<()> {
        info!(
            run_id,
            outputs = ?final_vars,
            inputs = inputs.len(),
            overrides = overrides.len(),
            "graph execution starting"
        );
        Ok(())
    }

    fn pre_task_execute(&self, run_id: &str, task: &TaskView) -> Result<()> {
        debug!(run_id, task_id = %task.task_id, nodes = task.node_names.len(), "task starting");
        Ok(())
    }

    fn pre_node_execute(
        &self,
        run_id: &str,
        node: &Node,
        _kwargs: &HashMap<String, Value>,
        task_id: Option<&str>,
    ) -> Result<()> {
        debug!(run_id, node = %node.name, task_id, "node starting");
        Ok(())
    }

    fn post_node_execute(
        &self,
        run_id: &str,
        node: &Node,
        _kwargs: &HashMap<String, Value>,
        success: bool,
        _result: Option<&Value>,
        error: Option<&FlowError>,
        task_id: Option<&str>,
    ) -> Result<()> {
        if success {
            debug!(run_id, node = %node.name, task_id, "node completed");
        } else {
            error!(run_id, node = %node.name, task_id, error = ?error, "node failed");
        }
        Ok(())
    }

    fn post_task_execute(
        &self,
        run_id: &str,
        task: &TaskView,
        success: bool,
        error: Option<&FlowError>,
    ) -> Result<()> {
        if success {
            debug!(run_id, task_id = %task.task_id, "task completed");
        } else {
            warn!(run_id, task_id = %task.task_id, error = ?error, "task failed");
        }
        Ok(())
    }

    fn post_graph_execute(
        &self,
        run_id: &str,
        _graph: &FunctionGraph,
        success: bool,
        results: Option<&HashMap<String, Value>>,
        error: Option<&FlowError>,
    ) -> Result<()> {
        if success {
            info!(run_id, outputs = results.map(|r| r.len()).unwrap_or(0), "graph execution completed");
        } else {
            error!(run_id, error = ?error, "graph execution failed");
        }
        Ok(())
    }
}

/// Opt-in graceful degradation: replaces node execution so a failing node
/// yields a sentinel value instead of aborting the run. Downstream nodes see
/// the sentinel and typically pass it along.
pub struct GracefulErrorAdapter {
    sentinel: Value,
}

impl GracefulErrorAdapter {
    pub fn new(sentinel: Value) -> Self {
        Self { sentinel }
    }
}

impl Default for GracefulErrorAdapter {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl LifecycleAdapter for GracefulErrorAdapter {
    fn name(&self) -> String {
        "GracefulErrorAdapter".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::DoNodeExecute]
    }

    fn do_node_execute(
        &self,
        run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
    ) -> Result<Value> {
        // A sentinel flowing in means an upstream node already failed.
        if kwargs.values().any(|v| v == &self.sentinel) {
            debug!(run_id, node = %node.name, "skipping node, sentinel input present");
            return Ok(self.sentinel.clone());
        }
        match default_node_execute(node, kwargs) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(run_id, node = %node.name, error = %err, "substituting sentinel for failed node");
                Ok(self.sentinel.clone())
            }
        }
    }
}
