//! The atomic unit of computation: a named, typed vertex with an input-type
//! map, a callable, and dependency edges to other nodes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::core::errors::{FlowError, Result};

use super::types::NodeType;

/// Where a node's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeSource {
    /// Produced by a function definition.
    Standard,
    /// Supplied at runtime or from config.
    External,
    /// Loaded from a prior run (caching layers).
    PriorRun,
    /// Dynamic fan-out point: produces a sequence, each element a branch.
    Expand,
    /// Dynamic fan-in point: consumes the collected branch results.
    Collect,
}

/// Whether a parameter must be supplied or carries a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Required,
    Optional,
}

/// A declared input parameter of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub node_type: NodeType,
    pub kind: DependencyKind,
    /// Default value for optional parameters.
    pub default: Option<Value>,
}

impl InputSpec {
    pub fn required(node_type: NodeType) -> Self {
        Self {
            node_type,
            kind: DependencyKind::Required,
            default: None,
        }
    }

    pub fn optional(node_type: NodeType, default: Value) -> Self {
        Self {
            node_type,
            kind: DependencyKind::Optional,
            default: Some(default),
        }
    }
}

/// The callable behind a standard node. Receives the resolved keyword
/// arguments and returns the node's value. Application errors flow through
/// as `anyhow::Error`.
pub trait NodeCompute: Send + Sync {
    fn call(&self, kwargs: &HashMap<String, Value>) -> anyhow::Result<Value>;
}

impl<F> NodeCompute for F
where
    F: Fn(&HashMap<String, Value>) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, kwargs: &HashMap<String, Value>) -> anyhow::Result<Value> {
        self(kwargs)
    }
}

/// A single named, typed computation vertex in the dependency graph.
///
/// Edges (`dependencies` / `depended_on_by`) are populated during graph
/// wiring, not at construction: nodes are created first, edges resolved
/// second, because a referenced input may not yet exist as a node.
#[derive(Clone)]
pub struct Node {
    pub name: String,
    pub node_type: NodeType,
    pub source: NodeSource,
    pub input_types: BTreeMap<String, InputSpec>,
    pub dependencies: Vec<String>,
    pub depended_on_by: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub doc: Option<String>,
    /// Names of the function definitions that contributed to this node,
    /// in the order they were encountered.
    pub originating_functions: Vec<String>,
    /// Absent for external nodes.
    pub compute: Option<Arc<dyn NodeCompute>>,
}

// Manual Debug: the compute field is an opaque trait object.
impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("node_type", &self.node_type)
            .field("source", &self.source)
            .field("input_types", &self.input_types)
            .field("dependencies", &self.dependencies)
            .field("depended_on_by", &self.depended_on_by)
            .field("tags", &self.tags)
            .field("originating_functions", &self.originating_functions)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Builds a node from a function definition, inferring the source from
    /// the dynamic type markers.
    pub fn from_definition(def: &FunctionDefinition) -> Result<Self> {
        let source = if def.returns.is_parallelizable() {
            NodeSource::Expand
        } else if def.params.values().any(|p| p.node_type.is_collected()) {
            NodeSource::Collect
        } else {
            NodeSource::Standard
        };
        Ok(Node {
            name: def.name.clone(),
            node_type: def.returns.clone(),
            source,
            input_types: def.params.clone(),
            dependencies: Vec::new(),
            depended_on_by: Vec::new(),
            tags: def.tags.clone(),
            doc: def.doc.clone(),
            originating_functions: vec![def.name.clone()],
            compute: Some(def.compute.clone()),
        })
    }

    /// Synthesizes an external node for a runtime- or config-supplied input.
    pub fn external(name: impl Into<String>, node_type: NodeType) -> Self {
        Node {
            name: name.into(),
            node_type,
            source: NodeSource::External,
            input_types: BTreeMap::new(),
            dependencies: Vec::new(),
            depended_on_by: Vec::new(),
            tags: BTreeMap::new(),
            doc: None,
            originating_functions: Vec::new(),
            compute: None,
        }
    }

    /// Synthesizes an `Any`-typed external node for a config-only key.
    pub fn from_config_key(name: impl Into<String>) -> Self {
        let mut node = Node::external(name, NodeType::Any);
        node.tags
            .insert("flowgraph.source".to_string(), "config".to_string());
        node
    }

    /// The one sanctioned mutation: tightening the type of an external node
    /// during dependency wiring. Any other node is a programmer error.
    pub fn set_type(&mut self, node_type: NodeType) -> Result<()> {
        if self.source != NodeSource::External {
            return Err(FlowError::internal(format!(
                "set_type called on non-external node '{}'",
                self.name
            )));
        }
        self.node_type = node_type;
        Ok(())
    }

    pub fn is_external(&self) -> bool {
        self.source == NodeSource::External
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.source, NodeSource::Expand | NodeSource::Collect)
    }

    /// Names of required dependencies only.
    pub fn required_dependencies(&self) -> impl Iterator<Item = &String> {
        self.input_types
            .iter()
            .filter(|(_, spec)| spec.kind == DependencyKind::Required)
            .map(|(name, _)| name)
    }

    /// The parameters carrying a `Collected` marker, with the referenced
    /// upstream (sink) name. Empty for non-collect nodes.
    pub fn collected_params(&self) -> Vec<(&String, &InputSpec)> {
        self.input_types
            .iter()
            .filter(|(_, spec)| spec.node_type.is_collected())
            .collect()
    }

    /// Copy-with-overrides: returns a builder seeded from this node, so
    /// graph-extension operations can layer changes without mutating the
    /// original definition.
    pub fn rebuild(&self) -> NodeRebuilder {
        NodeRebuilder { node: self.clone() }
    }
}

/// Structural equality: same name, type, doc, tags, source, and sorted
/// dependency/dependent names. Deliberately ignores the callable so tests
/// can assert graph-shape equivalence without reference equality.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        let mut our_deps = self.dependencies.clone();
        let mut their_deps = other.dependencies.clone();
        our_deps.sort();
        their_deps.sort();
        let mut our_dependents = self.depended_on_by.clone();
        let mut their_dependents = other.depended_on_by.clone();
        our_dependents.sort();
        their_dependents.sort();
        self.name == other.name
            && self.node_type == other.node_type
            && self.source == other.source
            && self.doc == other.doc
            && self.tags == other.tags
            && our_deps == their_deps
            && our_dependents == their_dependents
    }
}

/// Builder returned by [`Node::rebuild`].
pub struct NodeRebuilder {
    node: Node,
}

impl NodeRebuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.node.name = name.into();
        self
    }

    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.node.node_type = node_type;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node.tags.insert(key.into(), value.into());
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.node.dependencies = dependencies;
        self
    }

    pub fn depended_on_by(mut self, depended_on_by: Vec<String>) -> Self {
        self.node.depended_on_by = depended_on_by;
        self
    }

    pub fn finish(self) -> Node {
        self.node
    }
}

/// A typed function definition handed over by module discovery: the analog of
/// an annotated function. Carries everything needed to build one node.
#[derive(Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub returns: NodeType,
    pub params: BTreeMap<String, InputSpec>,
    pub tags: BTreeMap<String, String>,
    pub doc: Option<String>,
    pub compute: Arc<dyn NodeCompute>,
}

// Manual Debug: the compute field is an opaque trait object.
impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .field("params", &self.params)
            .field("tags", &self.tags)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

impl FunctionDefinition {
    /// Starts a builder. The return type and callable are mandatory;
    /// `build()` fails without them.
    pub fn builder(name: impl Into<String>) -> FunctionDefinitionBuilder {
        FunctionDefinitionBuilder {
            name: name.into(),
            returns: None,
            params: BTreeMap::new(),
            tags: BTreeMap::new(),
            doc: None,
            compute: None,
        }
    }
}

pub struct FunctionDefinitionBuilder {
    name: String,
    returns: Option<NodeType>,
    params: BTreeMap<String, InputSpec>,
    tags: BTreeMap<String, String>,
    doc: Option<String>,
    compute: Option<Arc<dyn NodeCompute>>,
}

impl FunctionDefinitionBuilder {
    pub fn returns(mut self, node_type: NodeType) -> Self {
        self.returns = Some(node_type);
        self
    }

    pub fn param(mut self, name: impl Into<String>, node_type: NodeType) -> Self {
        self.params.insert(name.into(), InputSpec::required(node_type));
        self
    }

    pub fn optional_param(
        mut self,
        name: impl Into<String>,
        node_type: NodeType,
        default: Value,
    ) -> Self {
        self.params
            .insert(name.into(), InputSpec::optional(node_type, default));
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn compute<F>(mut self, f: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.compute = Some(Arc::new(f));
        self
    }

    pub fn compute_arc(mut self, compute: Arc<dyn NodeCompute>) -> Self {
        self.compute = Some(compute);
        self
    }

    pub fn build(self) -> Result<FunctionDefinition> {
        let returns = self.returns.ok_or_else(|| FlowError::MissingReturnType {
            function: self.name.clone(),
        })?;
        let compute = self.compute.ok_or_else(|| {
            FlowError::internal(format!("function '{}' has no callable", self.name))
        })?;
        Ok(FunctionDefinition {
            name: self.name,
            returns,
            params: self.params,
            tags: self.tags,
            doc: self.doc,
            compute,
        })
    }
}

/// A named group of function definitions, the unit that module discovery
/// hands to graph construction.
#[derive(Clone)]
pub struct Module {
    pub name: String,
    pub functions: Vec<FunctionDefinition>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_function(mut self, def: FunctionDefinition) -> Self {
        self.functions.push(def);
        self
    }
}
