//! flowgraph - a dataflow graph engine.
//!
//! Builds dependency graphs from typed function definitions, resolves the
//! minimal subgraph for a set of requested outputs, and executes it either
//! with a direct depth-first executor or a task-grouped executor that
//! supports dynamic fan-out/fan-in and bounded parallel task execution.
//! Cross-cutting observability and behavior replacement go through a
//! lifecycle adapter layer.

// Core infrastructure
pub mod core;

// Graph data model, construction, and traversal
pub mod graph;

// Lifecycle hooks, methods, and validators
pub mod lifecycle;

// Executors: direct DFS and task-grouped
pub mod execution;

// Orchestration facade
pub mod driver;

// Re-exports for convenience
pub use crate::core::config::{ExecutionConfig, OnFailure};
pub use crate::core::errors::{FlowError, Result};
pub use driver::{Driver, DriverBuilder};
pub use execution::{
    DefaultGraphExecutor, GraphExecutor, GroupingStrategy, TaskBasedGraphExecutor,
};
pub use graph::{
    build_function_graph, FunctionDefinition, FunctionGraph, InputSpec, Module, Node, NodeCompute,
    NodeSource, NodeType,
};
pub use lifecycle::{
    AsyncLifecycleAdapter, GracefulErrorAdapter, LifecycleAdapter, LifecycleAdapterSet,
    LifecyclePoint, TracingHook,
};
