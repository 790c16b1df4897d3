//! Task-grouped execution with dynamic fan-out/fan-in.
//!
//! Pipeline: resolve required nodes, group them into tasks, seed the result
//! cache, prune the task plan, then drive a ready-queue scheduler to
//! completion. A task becomes eligible the instant all its predecessors have
//! completed; eligible tasks run concurrently subject to the configured
//! executor's bound.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::core::config::{ExecutionConfig, OnFailure};
use crate::core::errors::{FlowError, Result};
use crate::graph::function_graph::FunctionGraph;

use super::executor::{supplied_names, validate_runtime_inputs, GraphExecutor};
use super::grouping::{GroupByRepeatableBlocks, GroupingStrategy};
use super::state::ExecutionState;
use super::task::{Task, TaskPurpose, TaskSpec, TaskStatus};
use super::task_executor::{ExecutionManager, TaskOutcome, TaskWork};

/// Executor supporting dynamic fan-out/fan-in and pluggable parallel task
/// execution.
pub struct TaskBasedGraphExecutor {
    config: ExecutionConfig,
    grouping: Arc<dyn GroupingStrategy>,
    manager: Arc<ExecutionManager>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Default for TaskBasedGraphExecutor {
    fn default() -> Self {
        Self::new(ExecutionConfig::default())
    }
}

impl TaskBasedGraphExecutor {
    pub fn new(config: ExecutionConfig) -> Self {
        let manager = Arc::new(ExecutionManager::bounded(config.max_parallel_tasks));
        Self {
            config,
            grouping: Arc::new(GroupByRepeatableBlocks),
            manager,
            cancel: None,
        }
    }

    pub fn with_grouping(mut self, grouping: Arc<dyn GroupingStrategy>) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn with_manager(mut self, manager: Arc<ExecutionManager>) -> Self {
        self.manager = manager;
        self
    }

    /// Installs a cooperative cancellation channel, checked between task
    /// dispatches (never preemptive).
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[async_trait]
impl GraphExecutor for TaskBasedGraphExecutor {
    fn validate(&self, _graph: &FunctionGraph) -> Result<()> {
        // dynamic nodes are fine here; pairing well-formedness is checked
        // when the plan is built
        self.config.validate()
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

impl TaskBasedGraphExecutor {
    async fn execute_inner(
        &self,
        graph: &Arc<FunctionGraph>,
        final_vars: &[String],
        overrides: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        run_id: &str,
    ) -> Result<HashMap<String, Value>> {
        // stage 1: required nodes, with config and runtime inputs merged
        let supplied = supplied_names(graph, inputs);
        let override_names: HashSet<String> = overrides.keys().cloned().collect();
        let closure = graph.get_upstream_nodes(final_vars, Some(&supplied), &override_names)?;
        validate_runtime_inputs(graph, &closure, inputs, overrides)?;

        // nodes arriving with a value are never scheduled
        let mut to_schedule: HashSet<String> = closure.required.clone();
        to_schedule.retain(|name| !supplied.contains(name) && !override_names.contains(name));

        // stage 2: grouping
        let specs = self.grouping.group(graph, &to_schedule)?;

        // stage 3: seed the result cache (config, then inputs, then
        // overrides, later wins) so already-known tasks need not block
        let state = Arc::new(ExecutionState::new(run_id));
        state.cache.seed(graph.config());
        state.cache.seed(inputs);
        state.cache.seed(overrides);

        // stage 4: prune tasks nobody asked for, directly or transitively
        let specs = prune_plan(specs, final_vars);
        info!(run_id, tasks = specs.len(), "task plan created");

        // stage 5: run the ready-queue scheduler to completion
        self.run_to_completion(graph, specs, state.clone(), run_id).await?;

        // stage 6: exactly the requested names
        state.cache.take_outputs(final_vars)
    }

    async fn run_to_completion(
        &self,
        graph: &Arc<FunctionGraph>,
        specs: Vec<TaskSpec>,
        state: Arc<ExecutionState>,
        run_id: &str,
    ) -> Result<()> {
        let start = chrono::Utc::now();
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<TaskOutcome>();

        // block specs are templates, instantiated once the fan-out length
        // is known; everything else is runnable immediately
        let mut block_templates: HashMap<String, TaskSpec> = HashMap::new();
        let mut tasks: HashMap<String, Task> = HashMap::new();
        for spec in specs {
            if spec.is_block() {
                block_templates.insert(spec.id.clone(), spec);
            } else {
                let task = Task::from_spec(&spec);
                state.set_status(&task.id, TaskStatus::Pending);
                tasks.insert(task.id.clone(), task);
            }
        }

        let mut active: usize = 0;
        loop {
            // ready scan: pending tasks whose predecessors all completed
            let ready: Vec<String> = tasks
                .values()
                .filter(|task| {
                    state.status(&task.id) == Some(TaskStatus::Pending)
                        && task
                            .dependencies
                            .iter()
                            .all(|dep| state.status(dep) == Some(TaskStatus::Completed))
                })
                .map(|task| task.id.clone())
                .collect();

            for task_id in ready {
                let task = tasks
                    .get(&task_id)
                    .ok_or_else(|| FlowError::internal(format!("task '{task_id}' vanished")))?
                    .clone();
                state.set_status(&task_id, TaskStatus::Running);
                active += 1;
                debug!(run_id, task_id = %task_id, active, "dispatching ready task");
                let work = TaskWork {
                    graph: graph.clone(),
                    state: state.clone(),
                    task: task.clone(),
                };
                self.manager.select(&task).submit(work, outcome_tx.clone()).await?;
            }

            if active == 0 {
                let pending: Vec<String> = tasks
                    .keys()
                    .filter(|id| state.status(id) == Some(TaskStatus::Pending))
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    break;
                }
                // nothing running and nothing ready: the plan is stuck
                return Err(FlowError::internal(format!(
                    "scheduler stalled with pending tasks: {}",
                    pending.join(", ")
                )));
            }

            // cooperative checks between dispatches, never preemptive
            if let Some(cancel) = &self.cancel {
                if *cancel.borrow() {
                    warn!(run_id, "run cancelled");
                    return Err(FlowError::Cancelled);
                }
            }
            if let Some(limit) = self.config.timeout_seconds {
                let elapsed = (chrono::Utc::now() - start).num_seconds();
                if elapsed >= limit as i64 {
                    return Err(FlowError::Timeout {
                        timeout_seconds: limit,
                    });
                }
            }

            // wait for an outcome, waking periodically to re-check
            // cancellation and the timeout
            let outcome = match timeout(Duration::from_millis(250), outcome_rx.recv()).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => return Err(FlowError::internal("outcome channel closed")),
                Err(_) => continue,
            };
            active -= 1;

            match outcome.result {
                Ok(()) => {
                    state.set_status(&outcome.task_id, TaskStatus::Completed);
                    let finished = tasks
                        .get(&outcome.task_id)
                        .ok_or_else(|| {
                            FlowError::internal(format!("task '{}' vanished", outcome.task_id))
                        })?
                        .clone();
                    if let TaskPurpose::Expand { node } = &finished.purpose {
                        instantiate_blocks(
                            node,
                            &finished.id,
                            &mut block_templates,
                            &mut tasks,
                            &state,
                        )?;
                    }
                }
                Err(err) => {
                    state.set_status(&outcome.task_id, TaskStatus::Failed);
                    match self.config.on_failure {
                        OnFailure::FailFast => {
                            warn!(run_id, task_id = %outcome.task_id, "task failed, aborting run");
                            return Err(err);
                        }
                        OnFailure::Continue => {
                            warn!(
                                run_id,
                                task_id = %outcome.task_id,
                                error = %err,
                                "task failed, abandoning its downstream"
                            );
                            abandon_downstream(
                                &outcome.task_id,
                                &tasks,
                                &mut block_templates,
                                &state,
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Keeps only tasks that feed a requested output, directly or transitively.
fn prune_plan(specs: Vec<TaskSpec>, final_vars: &[String]) -> Vec<TaskSpec> {
    let by_id: HashMap<String, &TaskSpec> = specs.iter().map(|s| (s.id.clone(), s)).collect();
    let mut keep: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = specs
        .iter()
        .filter(|spec| spec.nodes.iter().any(|n| final_vars.contains(n)))
        .map(|spec| spec.id.clone())
        .collect();
    while let Some(id) = stack.pop() {
        if !keep.insert(id.clone()) {
            continue;
        }
        if let Some(spec) = by_id.get(&id) {
            for dep in &spec.dependencies {
                if !keep.contains(dep) {
                    stack.push(dep.clone());
                }
            }
        }
    }
    let dropped = specs.len() - keep.len();
    if dropped > 0 {
        debug!(dropped, "pruned tasks with no requested consumer");
    }
    specs.into_iter().filter(|spec| keep.contains(&spec.id)).collect()
}

/// Expand completion: unroll every block template fed by this expand into
/// one task per produced element, and rewire the paired collect task to wait
/// on the instances instead of the template.
fn instantiate_blocks(
    expand_node: &str,
    expand_task_id: &str,
    block_templates: &mut HashMap<String, TaskSpec>,
    tasks: &mut HashMap<String, Task>,
    state: &ExecutionState,
) -> Result<()> {
    let template_ids: Vec<String> = block_templates
        .values()
        .filter(|spec| {
            matches!(&spec.purpose, TaskPurpose::Block { expand_node: e, .. } if e == expand_node)
        })
        .map(|spec| spec.id.clone())
        .collect();
    if template_ids.is_empty() {
        return Ok(());
    }

    let elements = state
        .cache
        .get(expand_node)
        .and_then(|value| value.as_array().cloned())
        .ok_or_else(|| {
            FlowError::dynamic(format!("expand node '{expand_node}' produced no array"))
        })?;

    for template_id in template_ids {
        let spec = block_templates
            .remove(&template_id)
            .ok_or_else(|| FlowError::internal("block template vanished"))?;
        let mut instance_ids: Vec<String> = Vec::new();
        for (index, element) in elements.iter().enumerate() {
            let task = Task::block_instance(&spec, expand_node, index, element.clone());
            state.set_status(&task.id, TaskStatus::Pending);
            instance_ids.push(task.id.clone());
            tasks.insert(task.id.clone(), task);
        }
        info!(
            expand = %expand_node,
            block = %template_id,
            instances = instance_ids.len(),
            "fan-out unrolled"
        );
        // collect tasks waiting on the template now wait on the instances
        for task in tasks.values_mut() {
            if let Some(pos) = task.dependencies.iter().position(|d| d == &template_id) {
                task.dependencies.remove(pos);
                task.dependencies.extend(instance_ids.iter().cloned());
                // a zero-length fan-out leaves only the expand dependency
                if !task.dependencies.contains(&expand_task_id.to_string()) {
                    task.dependencies.push(expand_task_id.to_string());
                }
            }
        }
    }
    Ok(())
}

/// Marks every task transitively depending on `failed_id` as abandoned.
///
/// Block templates never run, but they carry dependency edges from their
/// upstream tasks to the paired collect; abandonment walks through them so
/// a failure ahead of an uninstantiated fan-out still reaches the collect.
/// Templates on an abandoned path are dropped outright so a later expand
/// completion cannot unroll them into unrunnable instances.
fn abandon_downstream(
    failed_id: &str,
    tasks: &HashMap<String, Task>,
    block_templates: &mut HashMap<String, TaskSpec>,
    state: &ExecutionState,
) {
    let mut abandoned: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = vec![failed_id.to_string()];
    while let Some(id) = stack.pop() {
        for task in tasks.values() {
            if task.dependencies.contains(&id) && abandoned.insert(task.id.clone()) {
                state.set_status(&task.id, TaskStatus::Abandoned);
                stack.push(task.id.clone());
            }
        }
        let dead_templates: Vec<String> = block_templates
            .values()
            .filter(|spec| spec.dependencies.contains(&id))
            .map(|spec| spec.id.clone())
            .collect();
        for template_id in dead_templates {
            if abandoned.insert(template_id.clone()) {
                block_templates.remove(&template_id);
                stack.push(template_id);
            }
        }
    }
}
