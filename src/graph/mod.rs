pub mod build;
pub mod function_graph;
pub mod node;
pub mod traverse;
pub mod types;

pub use build::build_function_graph;
pub use function_graph::FunctionGraph;
pub use node::{
    DependencyKind, FunctionDefinition, InputSpec, Module, Node, NodeCompute, NodeSource,
};
pub use types::{types_match, NodeType};
