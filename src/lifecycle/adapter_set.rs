//! Multiplexes hooks, methods, and validators across an arbitrary set of
//! user-supplied adapters.
//!
//! Indexes are built eagerly at construction: hook lists preserve
//! registration order, method points are checked for exclusivity (at most one
//! adapter per method, counting both the sync and async tracks), and
//! undeclared points are never dispatched to.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::debug;

use crate::core::errors::{FlowError, Result};
use crate::execution::task::TaskView;
use crate::graph::function_graph::FunctionGraph;
use crate::graph::node::Node;
use crate::graph::types::{self, NodeType};

use super::adapter::{default_build_result, default_node_execute, AsyncLifecycleAdapter, LifecycleAdapter};
use super::points::{LifecyclePoint, PointKind};

/// Outcome of one validator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub adapter: String,
    pub success: bool,
    pub message: Option<String>,
}

/// The per-run orchestration layer: given adapters, builds the hook, method,
/// and validator indexes and dispatches lifecycle points to them.
pub struct LifecycleAdapterSet {
    sync_adapters: Vec<Arc<dyn LifecycleAdapter>>,
    async_adapters: Vec<Arc<dyn AsyncLifecycleAdapter>>,
    sync_hooks: HashMap<LifecyclePoint, Vec<usize>>,
    async_hooks: HashMap<LifecyclePoint, Vec<usize>>,
    sync_methods: HashMap<LifecyclePoint, usize>,
    async_methods: HashMap<LifecyclePoint, usize>,
    sync_validators: HashMap<LifecyclePoint, Vec<usize>>,
}

impl std::fmt::Debug for LifecycleAdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleAdapterSet")
            .field("sync_hooks", &self.sync_hooks)
            .field("async_hooks", &self.async_hooks)
            .field("sync_methods", &self.sync_methods)
            .field("async_methods", &self.async_methods)
            .field("sync_validators", &self.sync_validators)
            .finish_non_exhaustive()
    }
}

impl Default for LifecycleAdapterSet {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new()).expect("empty adapter set cannot conflict")
    }
}

impl LifecycleAdapterSet {
    /// Builds the indexes, failing on the first method-exclusivity violation
    /// with an error naming the point and both adapters.
    pub fn new(
        sync_adapters: Vec<Arc<dyn LifecycleAdapter>>,
        async_adapters: Vec<Arc<dyn AsyncLifecycleAdapter>>,
    ) -> Result<Self> {
        let mut sync_hooks: HashMap<LifecyclePoint, Vec<usize>> = HashMap::new();
        let mut async_hooks: HashMap<LifecyclePoint, Vec<usize>> = HashMap::new();
        let mut sync_methods: HashMap<LifecyclePoint, usize> = HashMap::new();
        let mut async_methods: HashMap<LifecyclePoint, usize> = HashMap::new();
        let mut sync_validators: HashMap<LifecyclePoint, Vec<usize>> = HashMap::new();

        for (idx, adapter) in sync_adapters.iter().enumerate() {
            for point in adapter.implements() {
                match point.kind() {
                    PointKind::Hook => {
                        sync_hooks.entry(*point).or_default().push(idx);
                    }
                    PointKind::Method => {
                        if let Some(existing) = sync_methods.insert(*point, idx) {
                            return Err(FlowError::MethodConflict {
                                point: *point,
                                first: sync_adapters[existing].name(),
                                second: adapter.name(),
                            });
                        }
                    }
                    PointKind::Validator => {
                        sync_validators.entry(*point).or_default().push(idx);
                    }
                }
            }
        }

        for (idx, adapter) in async_adapters.iter().enumerate() {
            for point in adapter.implements() {
                match point.kind() {
                    PointKind::Hook => {
                        async_hooks.entry(*point).or_default().push(idx);
                    }
                    PointKind::Method => {
                        if *point != LifecyclePoint::DoNodeExecute {
                            return Err(FlowError::internal(format!(
                                "async adapter '{}' declares {point}, which has no async track",
                                adapter.name()
                            )));
                        }
                        if let Some(existing) = async_methods.insert(*point, idx) {
                            return Err(FlowError::MethodConflict {
                                point: *point,
                                first: async_adapters[existing].name(),
                                second: adapter.name(),
                            });
                        }
                    }
                    PointKind::Validator => {
                        return Err(FlowError::internal(format!(
                            "async adapter '{}' declares validator {point}; validators are sync-only",
                            adapter.name()
                        )));
                    }
                }
            }
        }

        // a method point is exclusive across both tracks, not just within
        // one: two owners would let the async path and the sync remote path
        // disagree on who executes a node
        for (point, async_idx) in &async_methods {
            if let Some(sync_idx) = sync_methods.get(point) {
                return Err(FlowError::MethodConflict {
                    point: *point,
                    first: sync_adapters[*sync_idx].name(),
                    second: async_adapters[*async_idx].name(),
                });
            }
        }

        debug!(
            sync_adapters = sync_adapters.len(),
            async_adapters = async_adapters.len(),
            "lifecycle adapter set built"
        );

        Ok(Self {
            sync_adapters,
            async_adapters,
            sync_hooks,
            async_hooks,
            sync_methods,
            async_methods,
            sync_validators,
        })
    }

    fn expect_kind(point: LifecyclePoint, kind: PointKind) -> Result<()> {
        if point.kind() != kind {
            return Err(FlowError::internal(format!(
                "{point} is a {:?}, not a {kind:?}",
                point.kind()
            )));
        }
        Ok(())
    }

    /// Whether any adapter (sync or async) implements the given hook.
    /// Asking about a non-hook point is a programmer error.
    pub fn does_hook(&self, point: LifecyclePoint) -> Result<bool> {
        Self::expect_kind(point, PointKind::Hook)?;
        Ok(self.sync_hooks.contains_key(&point) || self.async_hooks.contains_key(&point))
    }

    /// Whether an adapter owns the given method point.
    pub fn does_method(&self, point: LifecyclePoint) -> Result<bool> {
        Self::expect_kind(point, PointKind::Method)?;
        Ok(self.sync_methods.contains_key(&point) || self.async_methods.contains_key(&point))
    }

    /// Whether any adapter implements the given validator point.
    pub fn does_validation(&self, point: LifecyclePoint) -> Result<bool> {
        Self::expect_kind(point, PointKind::Validator)?;
        Ok(self.sync_validators.contains_key(&point))
    }

    fn sync_hook_adapters(&self, point: LifecyclePoint) -> Vec<&Arc<dyn LifecycleAdapter>> {
        self.sync_hooks
            .get(&point)
            .map(|idxs| idxs.iter().map(|i| &self.sync_adapters[*i]).collect())
            .unwrap_or_default()
    }

    fn async_hook_adapters(&self, point: LifecyclePoint) -> Vec<&Arc<dyn AsyncLifecycleAdapter>> {
        self.async_hooks
            .get(&point)
            .map(|idxs| idxs.iter().map(|i| &self.async_adapters[*i]).collect())
            .unwrap_or_default()
    }

    // --- construction-time hooks (sync dispatch only; async adapters join
    // in from graph execution onward) ---

    pub fn pre_do_anything(&self) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PreDoAnything) {
            adapter.pre_do_anything()?;
        }
        Ok(())
    }

    pub fn post_graph_construct(
        &self,
        graph: &FunctionGraph,
        success: bool,
        error: Option<&FlowError>,
    ) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PostGraphConstruct) {
            adapter.post_graph_construct(graph, success, error)?;
        }
        Ok(())
    }

    // --- execution hooks: sync adapters in registration order, then async
    // adapters concurrently ---

    pub async fn pre_graph_execute(
        &self,
        run_id: &str,
        graph: &FunctionGraph,
        final_vars: &[String],
        inputs: &HashMap<String, Value>,
        overrides: &HashMap<String, Value>,
    ) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PreGraphExecute) {
            adapter.pre_graph_execute(run_id, graph, final_vars, inputs, overrides)?;
        }
        let futures: Vec<_> = self
            .async_hook_adapters(LifecyclePoint::PreGraphExecute)
            .into_iter()
            .map(|a| a.pre_graph_execute(run_id, graph, final_vars, inputs, overrides))
            .collect();
        for outcome in join_all(futures).await {
            outcome?;
        }
        Ok(())
    }

    pub async fn post_graph_execute(
        &self,
        run_id: &str,
        graph: &FunctionGraph,
        success: bool,
        results: Option<&HashMap<String, Value>>,
        error: Option<&FlowError>,
    ) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PostGraphExecute) {
            adapter.post_graph_execute(run_id, graph, success, results, error)?;
        }
        let futures: Vec<_> = self
            .async_hook_adapters(LifecyclePoint::PostGraphExecute)
            .into_iter()
            .map(|a| a.post_graph_execute(run_id, graph, success, results, error))
            .collect();
        for outcome in join_all(futures).await {
            outcome?;
        }
        Ok(())
    }

    pub async fn pre_task_execute(&self, run_id: &str, task: &TaskView) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PreTaskExecute) {
            adapter.pre_task_execute(run_id, task)?;
        }
        let futures: Vec<_> = self
            .async_hook_adapters(LifecyclePoint::PreTaskExecute)
            .into_iter()
            .map(|a| a.pre_task_execute(run_id, task))
            .collect();
        for outcome in join_all(futures).await {
            outcome?;
        }
        Ok(())
    }

    pub async fn post_task_execute(
        &self,
        run_id: &str,
        task: &TaskView,
        success: bool,
        error: Option<&FlowError>,
    ) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PostTaskExecute) {
            adapter.post_task_execute(run_id, task, success, error)?;
        }
        let futures: Vec<_> = self
            .async_hook_adapters(LifecyclePoint::PostTaskExecute)
            .into_iter()
            .map(|a| a.post_task_execute(run_id, task, success, error))
            .collect();
        for outcome in join_all(futures).await {
            outcome?;
        }
        Ok(())
    }

    pub async fn pre_node_execute(
        &self,
        run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
        task_id: Option<&str>,
    ) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PreNodeExecute) {
            adapter.pre_node_execute(run_id, node, kwargs, task_id)?;
        }
        let futures: Vec<_> = self
            .async_hook_adapters(LifecyclePoint::PreNodeExecute)
            .into_iter()
            .map(|a| a.pre_node_execute(run_id, node, kwargs, task_id))
            .collect();
        for outcome in join_all(futures).await {
            outcome?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn post_node_execute(
        &self,
        run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
        success: bool,
        result: Option<&Value>,
        error: Option<&FlowError>,
        task_id: Option<&str>,
    ) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PostNodeExecute) {
            adapter.post_node_execute(run_id, node, kwargs, success, result, error, task_id)?;
        }
        let futures: Vec<_> = self
            .async_hook_adapters(LifecyclePoint::PostNodeExecute)
            .into_iter()
            .map(|a| a.post_node_execute(run_id, node, kwargs, success, result, error, task_id))
            .collect();
        for outcome in join_all(futures).await {
            outcome?;
        }
        Ok(())
    }

    /// Sync-only variants of the per-node hooks, used inside
    /// `do_remote_execute` wrappers where no async context is available.
    pub fn pre_node_execute_sync(
        &self,
        run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
        task_id: Option<&str>,
    ) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PreNodeExecute) {
            adapter.pre_node_execute(run_id, node, kwargs, task_id)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn post_node_execute_sync(
        &self,
        run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
        success: bool,
        result: Option<&Value>,
        error: Option<&FlowError>,
        task_id: Option<&str>,
    ) -> Result<()> {
        for adapter in self.sync_hook_adapters(LifecyclePoint::PostNodeExecute) {
            adapter.post_node_execute(run_id, node, kwargs, success, result, error, task_id)?;
        }
        Ok(())
    }

    // --- methods: unwrap the single registered adapter or fall back to the
    // engine default ---

    pub fn check_edge_types_match(&self, expected: &NodeType, actual: &NodeType) -> Result<bool> {
        match self.sync_methods.get(&LifecyclePoint::DoCheckEdgeTypesMatch) {
            Some(idx) => self.sync_adapters[*idx].do_check_edge_types_match(expected, actual),
            None => Ok(types::types_match(expected, actual)),
        }
    }

    pub fn validate_input(&self, node: &Node, value: &Value) -> Result<bool> {
        match self.sync_methods.get(&LifecyclePoint::DoValidateInput) {
            Some(idx) => self.sync_adapters[*idx].do_validate_input(node, value),
            None => Ok(types::validate_value(&node.node_type, value)),
        }
    }

    /// Node execution method dispatch: the async track wins if registered,
    /// then the sync track, then the engine default.
    pub async fn execute_node(
        &self,
        run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
    ) -> Result<Value> {
        if let Some(idx) = self.async_methods.get(&LifecyclePoint::DoNodeExecute) {
            return self.async_adapters[*idx].do_node_execute(run_id, node, kwargs).await;
        }
        if let Some(idx) = self.sync_methods.get(&LifecyclePoint::DoNodeExecute) {
            return self.sync_adapters[*idx].do_node_execute(run_id, node, kwargs);
        }
        default_node_execute(node, kwargs)
    }

    /// Sync-only node execution dispatch for `do_remote_execute` bodies.
    pub fn execute_node_sync(
        &self,
        run_id: &str,
        node: &Node,
        kwargs: &HashMap<String, Value>,
    ) -> Result<Value> {
        match self.sync_methods.get(&LifecyclePoint::DoNodeExecute) {
            Some(idx) => self.sync_adapters[*idx].do_node_execute(run_id, node, kwargs),
            None => default_node_execute(node, kwargs),
        }
    }

    pub fn remote_execute(
        &self,
        run_id: &str,
        task: &TaskView,
        execute: &dyn Fn() -> Result<HashMap<String, Value>>,
    ) -> Result<HashMap<String, Value>> {
        match self.sync_methods.get(&LifecyclePoint::DoRemoteExecute) {
            Some(idx) => self.sync_adapters[*idx].do_remote_execute(run_id, task, execute),
            None => execute(),
        }
    }

    pub fn build_result(&self, outputs: &HashMap<String, Value>) -> Result<Value> {
        match self.sync_methods.get(&LifecyclePoint::DoBuildResult) {
            Some(idx) => self.sync_adapters[*idx].do_build_result(outputs),
            None => Ok(default_build_result(outputs)),
        }
    }

    // --- validators ---

    /// Runs every `validate_node` adapter against the node, returning all
    /// outcomes (or only failures), sorted by adapter name for deterministic
    /// reporting.
    pub fn call_all_node_validators(&self, node: &Node, failures_only: bool) -> Vec<ValidationOutcome> {
        let mut outcomes: Vec<ValidationOutcome> = self
            .sync_validators
            .get(&LifecyclePoint::ValidateNode)
            .map(|idxs| {
                idxs.iter()
                    .map(|i| {
                        let adapter = &self.sync_adapters[*i];
                        let (success, message) = adapter.validate_node(node);
                        ValidationOutcome {
                            adapter: adapter.name(),
                            success,
                            message,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        if failures_only {
            outcomes.retain(|o| !o.success);
        }
        outcomes.sort_by(|a, b| a.adapter.cmp(&b.adapter));
        outcomes
    }

    /// Runs every `validate_graph` adapter, same aggregation rules as
    /// [`Self::call_all_node_validators`].
    pub fn call_all_graph_validators(
        &self,
        graph: &FunctionGraph,
        failures_only: bool,
    ) -> Vec<ValidationOutcome> {
        let mut outcomes: Vec<ValidationOutcome> = self
            .sync_validators
            .get(&LifecyclePoint::ValidateGraph)
            .map(|idxs| {
                idxs.iter()
                    .map(|i| {
                        let adapter = &self.sync_adapters[*i];
                        let (success, message) = adapter.validate_graph(graph);
                        ValidationOutcome {
                            adapter: adapter.name(),
                            success,
                            message,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        if failures_only {
            outcomes.retain(|o| !o.success);
        }
        outcomes.sort_by(|a, b| a.adapter.cmp(&b.adapter));
        outcomes
    }
}
