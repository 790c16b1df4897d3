use thiserror::Error;

use crate::lifecycle::points::LifecyclePoint;

/// Unified error type for the flowgraph library.
///
/// Construction-time and validation errors are aggregated where possible so a
/// user can fix every reported problem in one pass; execution errors carry the
/// failing node and the underlying cause.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Two function definitions produced the same node name without
    /// `allow_module_overrides` being set.
    #[error("duplicate node '{name}': defined by both '{first}' and '{second}' (enable allow_module_overrides to let later modules replace earlier ones)")]
    DuplicateNode {
        name: String,
        first: String,
        second: String,
    },

    /// A function definition was built without a return type.
    #[error("function '{function}' has no return type; every node must declare the type it produces")]
    MissingReturnType { function: String },

    /// Two functions disagree about the type of a shared dependency and
    /// neither type is a tightening of the other.
    #[error("type mismatch on '{name}': '{consumer}' expects {expected} but '{producer}' produces {actual}")]
    IncompatibleTypes {
        name: String,
        consumer: String,
        expected: String,
        producer: String,
        actual: String,
    },

    /// Requested output names that no node, input, or override explains.
    /// Aggregated: every unknown name is reported at once.
    #[error("unknown output(s) requested: {}", names.join(", "))]
    UnknownOutputs { names: Vec<String> },

    /// Static validator failures, aggregated across all failing
    /// nodes/validators and sorted for deterministic output.
    #[error("graph validation failed:\n{}", failures.join("\n"))]
    Validation { failures: Vec<String> },

    /// Runtime input values that fail type validation or required inputs
    /// that were not supplied. Aggregated and sorted.
    #[error("invalid inputs:\n{}", failures.join("\n"))]
    InvalidInputs { failures: Vec<String> },

    /// A node's callable raised during execution.
    #[error("node '{node}' failed during execution")]
    NodeExecution {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    /// Two adapters both implement the same replaceable method.
    #[error("lifecycle method {point:?} is implemented by both '{first}' and '{second}'; at most one adapter may own a method")]
    MethodConflict {
        point: LifecyclePoint,
        first: String,
        second: String,
    },

    /// The dependency graph contains at least one cycle.
    #[error("graph contains cycle(s): {}", cycles.iter().map(|c| c.join(" -> ")).collect::<Vec<_>>().join("; "))]
    Cycle { cycles: Vec<Vec<String>> },

    /// Malformed dynamic structure (expand/collect pairing).
    #[error("invalid dynamic structure: {message}")]
    DynamicStructure { message: String },

    /// A requested output was never produced (failed or abandoned branch).
    #[error("no result produced for '{name}'")]
    MissingResult { name: String },

    /// Wall-clock timeout exceeded during task-based execution.
    #[error("execution timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    /// The run was cancelled via the cancellation channel.
    #[error("execution cancelled")]
    Cancelled,

    /// Configuration rejected by validation.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Programmer error in integration code (wrong lifecycle point kind,
    /// set_type on a non-external node, ...). Not meant to be caught.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FlowError {
    pub fn internal(message: impl Into<String>) -> Self {
        FlowError::Internal {
            message: message.into(),
        }
    }

    pub fn dynamic(message: impl Into<String>) -> Self {
        FlowError::DynamicStructure {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        FlowError::Configuration {
            message: message.into(),
        }
    }

    /// Build an aggregated validation error from failure messages.
    /// Messages are sorted so output ordering is reproducible.
    pub fn validation(mut failures: Vec<String>) -> Self {
        failures.sort();
        FlowError::Validation { failures }
    }

    /// Build an aggregated input error, sorted for deterministic output.
    pub fn invalid_inputs(mut failures: Vec<String>) -> Self {
        failures.sort();
        FlowError::InvalidInputs { failures }
    }

    /// Build an aggregated unknown-outputs error, sorted.
    pub fn unknown_outputs(mut names: Vec<String>) -> Self {
        names.sort();
        FlowError::UnknownOutputs { names }
    }
}

/// Result type alias used throughout the library.
pub type Result<T> = std::result::Result<T, FlowError>;
