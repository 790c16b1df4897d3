//! Task executors: where a ready task actually runs.
//!
//! The local executor is synchronous within the scheduler turn; the pooled
//! executor spawns onto the runtime behind a semaphore so parallelizable
//! blocks fan out with bounded concurrency.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info};

use crate::core::errors::{FlowError, Result};
use crate::graph::function_graph::{
    execute_single_node, execute_single_node_sync, resolve_kwargs, FunctionGraph,
};
use crate::lifecycle::points::LifecyclePoint;

use super::state::ExecutionState;
use super::task::{Task, TaskPurpose};

/// Result of one task's execution, delivered back to the scheduler.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task_id: String,
    pub result: Result<()>,
}

/// A dispatched unit of work: one task instance plus everything needed to
/// run its nodes.
pub struct TaskWork {
    pub graph: Arc<FunctionGraph>,
    pub state: Arc<ExecutionState>,
    pub task: Task,
}

impl TaskWork {
    /// Runs the task, bracketed by the task lifecycle hooks. Per-node hooks
    /// still fire for every node inside.
    pub async fn run(self) -> TaskOutcome {
        let adapters = self.graph.adapters().clone();
        let run_id = self.state.run_id.clone();
        let view = self.task.view();
        let task_id = self.task.id.clone();

        let result = match adapters.pre_task_execute(&run_id, &view).await {
            Ok(()) => self.run_inner(&run_id).await,
            Err(err) => Err(err),
        };
        let hook_result = adapters
            .post_task_execute(&run_id, &view, result.is_ok(), result.as_ref().err())
            .await;
        let result = result.and(hook_result);
        TaskOutcome { task_id, result }
    }

    async fn run_inner(&self, run_id: &str) -> Result<()> {
        match &self.task.purpose {
            TaskPurpose::Standard => self.run_plain_nodes(run_id).await,
            TaskPurpose::Expand { node } => self.run_expand(run_id, node).await,
            TaskPurpose::Collect { node, .. } => self.run_collect(run_id, node).await,
            TaskPurpose::Block { expand_node, sinks, .. } => {
                self.run_block(run_id, expand_node, sinks).await
            }
        }
    }

    async fn run_plain_nodes(&self, run_id: &str) -> Result<()> {
        let adapters = self.graph.adapters();
        for name in &self.task.nodes {
            let node = self
                .graph
                .get(name)
                .ok_or_else(|| FlowError::internal(format!("node '{name}' not in graph")))?;
            let available = self.state.cache.snapshot();
            let kwargs = resolve_kwargs(node, &available)?;
            let value =
                execute_single_node(adapters, run_id, node, &kwargs, Some(&self.task.id)).await?;
            self.state.cache.insert(name, value);
        }
        Ok(())
    }

    async fn run_expand(&self, run_id: &str, name: &str) -> Result<()> {
        let adapters = self.graph.adapters();
        let node = self
            .graph
            .get(name)
            .ok_or_else(|| FlowError::internal(format!("expand node '{name}' not in graph")))?;
        let available = self.state.cache.snapshot();
        let kwargs = resolve_kwargs(node, &available)?;
        let value =
            execute_single_node(adapters, run_id, node, &kwargs, Some(&self.task.id)).await?;
        if !value.is_array() {
            return Err(FlowError::dynamic(format!(
                "expand node '{name}' must produce an array, got {value}"
            )));
        }
        info!(
            run_id,
            node = %name,
            branches = value.as_array().map(|a| a.len()).unwrap_or(0),
            "fan-out length resolved"
        );
        self.state.cache.insert(name, value);
        Ok(())
    }

    async fn run_collect(&self, run_id: &str, name: &str) -> Result<()> {
        let adapters = self.graph.adapters();
        let node = self
            .graph
            .get(name)
            .ok_or_else(|| FlowError::internal(format!("collect node '{name}' not in graph")))?;
        let mut available = self.state.cache.snapshot();
        for (param, _) in node.collected_params() {
            available.insert(param.clone(), self.state.collected_array(param));
        }
        let kwargs = resolve_kwargs(node, &available)?;
        let value =
            execute_single_node(adapters, run_id, node, &kwargs, Some(&self.task.id)).await?;
        self.state.cache.insert(name, value);
        Ok(())
    }

    async fn run_block(&self, run_id: &str, expand_node: &str, sinks: &[String]) -> Result<()> {
        let adapters = self.graph.adapters();
        let index = self.task.index.ok_or_else(|| {
            FlowError::internal(format!("block task '{}' has no element index", self.task.id))
        })?;

        // the remote-execute method, when registered, wraps the whole block
        if adapters.does_method(LifecyclePoint::DoRemoteExecute)? {
            let view = self.task.view();
            let outputs =
                adapters.remote_execute(run_id, &view, &|| self.run_block_sync(run_id, sinks))?;
            for (sink, value) in outputs {
                self.state.record_block_output(&sink, index, value);
            }
            return Ok(());
        }

        let mut scope = self.state.cache.snapshot();
        if let Some((bound_name, element)) = &self.task.binding {
            scope.insert(bound_name.clone(), element.clone());
        } else {
            return Err(FlowError::internal(format!(
                "block task '{}' has no element binding for '{expand_node}'",
                self.task.id
            )));
        }
        for name in &self.task.nodes {
            let node = self
                .graph
                .get(name)
                .ok_or_else(|| FlowError::internal(format!("node '{name}' not in graph")))?;
            let kwargs = resolve_kwargs(node, &scope)?;
            let value =
                execute_single_node(adapters, run_id, node, &kwargs, Some(&self.task.id)).await?;
            if sinks.contains(name) {
                self.state.record_block_output(name, index, value.clone());
            }
            // block-internal values stay task-local; only sinks escape
            scope.insert(name.clone(), value);
        }
        Ok(())
    }

    /// Synchronous block body handed to `do_remote_execute` wrappers.
    /// Returns the sink outputs for this element.
    fn run_block_sync(&self, run_id: &str, sinks: &[String]) -> Result<HashMap<String, Value>> {
        let adapters = self.graph.adapters();
        let mut scope = self.state.cache.snapshot();
        if let Some((bound_name, element)) = &self.task.binding {
            scope.insert(bound_name.clone(), element.clone());
        }
        let mut outputs = HashMap::new();
        for name in &self.task.nodes {
            let node = self
                .graph
                .get(name)
                .ok_or_else(|| FlowError::internal(format!("node '{name}' not in graph")))?;
            let kwargs = resolve_kwargs(node, &scope)?;
            let value =
                execute_single_node_sync(adapters, run_id, node, &kwargs, Some(&self.task.id))?;
            if sinks.contains(name) {
                outputs.insert(name.clone(), value.clone());
            }
            scope.insert(name.clone(), value);
        }
        Ok(outputs)
    }
}

/// Where ready tasks run. Implementations deliver the outcome on the
/// scheduler's channel; `submit` returns once the work is accepted.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn submit(
        &self,
        work: TaskWork,
        outcomes: mpsc::UnboundedSender<TaskOutcome>,
    ) -> Result<()>;
}

/// Runs the task inline within the scheduler turn. The default for
/// non-parallelizable tasks.
#[derive(Debug, Default)]
pub struct SynchronousLocalTaskExecutor;

#[async_trait]
impl TaskExecutor for SynchronousLocalTaskExecutor {
    async fn submit(
        &self,
        work: TaskWork,
        outcomes: mpsc::UnboundedSender<TaskOutcome>,
    ) -> Result<()> {
        let outcome = work.run().await;
        outcomes
            .send(outcome)
            .map_err(|_| FlowError::internal("scheduler outcome channel closed"))
    }
}

/// Spawns tasks onto the tokio runtime, bounded by a semaphore. The default
/// for parallelizable block tasks.
pub struct PooledTaskExecutor {
    semaphore: Arc<Semaphore>,
    max_tasks: usize,
}

impl PooledTaskExecutor {
    pub fn new(max_tasks: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_tasks)),
            max_tasks,
        }
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }
}

impl Default for PooledTaskExecutor {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl TaskExecutor for PooledTaskExecutor {
    async fn submit(
        &self,
        work: TaskWork,
        outcomes: mpsc::UnboundedSender<TaskOutcome>,
    ) -> Result<()> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FlowError::internal("task executor semaphore closed"))?;
        debug!(task_id = %work.task.id, "spawning task on pooled executor");
        tokio::spawn(async move {
            let outcome = work.run().await;
            drop(permit);
            let _ = outcomes.send(outcome);
        });
        Ok(())
    }
}

/// Routes each ready task to the local or the remote (parallel) executor.
/// Block tasks are the remote candidates; everything else runs locally.
pub struct ExecutionManager {
    local: Arc<dyn TaskExecutor>,
    remote: Arc<dyn TaskExecutor>,
}

impl ExecutionManager {
    pub fn new(local: Arc<dyn TaskExecutor>, remote: Arc<dyn TaskExecutor>) -> Self {
        Self { local, remote }
    }

    /// Local executor plus a pool admitting at most `max_tasks` concurrent
    /// block tasks.
    pub fn bounded(max_tasks: usize) -> Self {
        Self::new(
            Arc::new(SynchronousLocalTaskExecutor),
            Arc::new(PooledTaskExecutor::new(max_tasks)),
        )
    }

    pub fn select(&self, task: &Task) -> Arc<dyn TaskExecutor> {
        if matches!(task.purpose, TaskPurpose::Block { .. }) {
            self.remote.clone()
        } else {
            self.local.clone()
        }
    }
}

impl Default for ExecutionManager {
    fn default() -> Self {
        Self::new(
            Arc::new(SynchronousLocalTaskExecutor),
            Arc::new(PooledTaskExecutor::default()),
        )
    }
}
