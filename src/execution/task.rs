//! Execution-time task model for the task-based executor.
//!
//! A task groups one or more nodes scheduled as a unit. Task identity is
//! per-run and distinct from the static graph: parallelizable blocks are
//! unrolled dynamically once the fan-out length is known.

use serde_json::Value;

/// Why a task exists, and how the scheduler treats it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPurpose {
    /// Ordinary node chain, runs once on the local executor.
    Standard,
    /// A single fan-out node; its output length drives block instantiation.
    Expand { node: String },
    /// A single fan-in node; waits for every block instance.
    Collect { node: String, expand_task: String },
    /// The repeatable block between an expand and its collect. Instantiated
    /// once per produced element; candidates for the remote executor.
    Block {
        expand_node: String,
        collect_node: String,
        /// Block nodes whose outputs the collect node gathers.
        sinks: Vec<String>,
    },
}

/// A statically planned task: produced by the grouping strategy, pruned
/// against the requested outputs, then instantiated at run time.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: String,
    /// Node names in dependency order within the task.
    pub nodes: Vec<String>,
    /// Ids of tasks that must complete before this one is ready.
    pub dependencies: Vec<String>,
    pub purpose: TaskPurpose,
}

impl TaskSpec {
    pub fn is_block(&self) -> bool {
        matches!(self.purpose, TaskPurpose::Block { .. })
    }
}

/// A runnable task instance. For block tasks, one instance exists per
/// fan-out element, carrying the element bound to the expand node's name.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub spec_id: String,
    pub nodes: Vec<String>,
    pub purpose: TaskPurpose,
    pub dependencies: Vec<String>,
    /// `(expand node name, element value)` for block instances.
    pub binding: Option<(String, Value)>,
    /// Position of the element within the fan-out, for ordered collection.
    pub index: Option<usize>,
}

impl Task {
    pub fn from_spec(spec: &TaskSpec) -> Self {
        Self {
            id: spec.id.clone(),
            spec_id: spec.id.clone(),
            nodes: spec.nodes.clone(),
            purpose: spec.purpose.clone(),
            dependencies: spec.dependencies.clone(),
            binding: None,
            index: None,
        }
    }

    /// Instantiates one block task for a fan-out element.
    pub fn block_instance(spec: &TaskSpec, expand_node: &str, index: usize, element: Value) -> Self {
        Self {
            id: format!("{}[{}]", spec.id, index),
            spec_id: spec.id.clone(),
            nodes: spec.nodes.clone(),
            purpose: spec.purpose.clone(),
            dependencies: spec.dependencies.clone(),
            binding: Some((expand_node.to_string(), element)),
            index: Some(index),
        }
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            task_id: self.id.clone(),
            spec_id: self.spec_id.clone(),
            node_names: self.nodes.clone(),
        }
    }
}

/// Scheduler-side task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Skipped because an upstream task failed under the `Continue` policy.
    Abandoned,
}

/// What lifecycle hooks see of a task: identity and member nodes, without
/// scheduler internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskView {
    pub task_id: String,
    pub spec_id: String,
    pub node_names: Vec<String>,
}
