//! Orchestration facade: build a graph from modules, validate it, pick an
//! executor, and run requests against it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::core::config::ExecutionConfig;
use crate::core::errors::{FlowError, Result};
use crate::execution::executor::{DefaultGraphExecutor, GraphExecutor};
use crate::execution::task_based::TaskBasedGraphExecutor;
use crate::graph::build::build_function_graph;
use crate::graph::function_graph::FunctionGraph;
use crate::graph::node::Module;
use crate::lifecycle::adapter::{AsyncLifecycleAdapter, LifecycleAdapter};
use crate::lifecycle::adapter_set::LifecycleAdapterSet;

/// Builder for a [`Driver`]. Collects modules, config, and adapters, then
/// constructs and validates the graph.
#[derive(Default)]
pub struct DriverBuilder {
    modules: Vec<Module>,
    config: HashMap<String, Value>,
    sync_adapters: Vec<Arc<dyn LifecycleAdapter>>,
    async_adapters: Vec<Arc<dyn AsyncLifecycleAdapter>>,
    allow_module_overrides: bool,
    execution_config: ExecutionConfig,
    dynamic_execution: bool,
}

impl DriverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_config(mut self, config: HashMap<String, Value>) -> Self {
        self.config.extend(config);
        self
    }

    pub fn with_config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn LifecycleAdapter>) -> Self {
        self.sync_adapters.push(adapter);
        self
    }

    pub fn with_async_adapter(mut self, adapter: Arc<dyn AsyncLifecycleAdapter>) -> Self {
        self.async_adapters.push(adapter);
        self
    }

    /// Later modules silently replace earlier definitions of the same name.
    pub fn allow_module_overrides(mut self) -> Self {
        self.allow_module_overrides = true;
        self
    }

    pub fn with_execution_config(mut self, config: ExecutionConfig) -> Self {
        self.execution_config = config;
        self
    }

    /// Switches to the task-based executor, required for graphs with
    /// expand/collect nodes.
    pub fn enable_dynamic_execution(mut self) -> Self {
        self.dynamic_execution = true;
        self
    }

    pub fn build(self) -> Result<Driver> {
        self.execution_config.validate()?;
        let adapters = Arc::new(LifecycleAdapterSet::new(
            self.sync_adapters,
            self.async_adapters,
        )?);

        adapters.pre_do_anything()?;

        let graph_result = build_function_graph(
            &self.modules,
            self.config,
            adapters.clone(),
            self.allow_module_overrides,
        );
        let graph = match graph_result {
            Ok(graph) => {
                adapters.post_graph_construct(&graph, true, None)?;
                graph
            }
            Err(err) => {
                // give hooks a look at the failure; an empty graph stands in
                let empty =
                    FunctionGraph::from_parts(HashMap::new(), HashMap::new(), adapters.clone());
                adapters.post_graph_construct(&empty, false, Some(&err))?;
                return Err(err);
            }
        };

        // static validators, aggregated so every failure surfaces at once
        let mut failures: Vec<String> = Vec::new();
        for node in graph.nodes() {
            for outcome in adapters.call_all_node_validators(node, true) {
                failures.push(format!(
                    "node '{}' failed {}: {}",
                    node.name,
                    outcome.adapter,
                    outcome.message.unwrap_or_else(|| "no detail".to_string())
                ));
            }
        }
        for outcome in adapters.call_all_graph_validators(&graph, true) {
            failures.push(format!(
                "graph failed {}: {}",
                outcome.adapter,
                outcome.message.unwrap_or_else(|| "no detail".to_string())
            ));
        }
        if !failures.is_empty() {
            return Err(FlowError::validation(failures));
        }

        let executor: Box<dyn GraphExecutor> = if self.dynamic_execution {
            Box::new(TaskBasedGraphExecutor::new(self.execution_config.clone()))
        } else {
            Box::new(DefaultGraphExecutor)
        };
        executor.validate(&graph)?;

        info!(
            nodes = graph.len(),
            dynamic = self.dynamic_execution,
            "driver ready"
        );
        Ok(Driver {
            graph: Arc::new(graph),
            executor,
        })
    }
}

/// Client entry point: resolves requested outputs against the graph and
/// executes them, optionally combining them through the `do_build_result`
/// method.
pub struct Driver {
    graph: Arc<FunctionGraph>,
    executor: Box<dyn GraphExecutor>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").finish_non_exhaustive()
    }
}

impl Driver {
    pub fn builder() -> DriverBuilder {
        DriverBuilder::new()
    }

    pub fn graph(&self) -> &Arc<FunctionGraph> {
        &self.graph
    }

    /// Runs the requested outputs and returns the raw name -> value map.
    pub async fn raw_execute(
        &self,
        final_vars: &[String],
        overrides: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        run_id: Option<&str>,
    ) -> Result<HashMap<String, Value>> {
        let generated;
        let run_id = match run_id {
            Some(id) => id,
            None => {
                generated = cuid2::create_id();
                &generated
            }
        };
        debug!(run_id, outputs = ?final_vars, "executing request");
        self.executor
            .execute(self.graph.clone(), final_vars, overrides, inputs, run_id)
            .await
    }

    /// Runs the requested outputs and combines them via the registered
    /// `do_build_result` method (default: a JSON object keyed by name).
    pub async fn execute(
        &self,
        final_vars: &[String],
        overrides: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
    ) -> Result<Value> {
        let outputs = self.raw_execute(final_vars, overrides, inputs, None).await?;
        self.graph.adapters().build_result(&outputs)
    }
}
