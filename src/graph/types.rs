//! Declared types for node outputs and parameters.
//!
//! There is no runtime reflection over Rust signatures, so every function
//! definition states its types as data. Compatibility checks are permissive:
//! `Any` matches everything and a union member matches the union.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The declared type of a node output or input parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Matches any type on either side of an edge.
    Any,
    Bool,
    Int,
    Float,
    Str,
    /// Homogeneous list with an element type.
    List(Box<NodeType>),
    /// String-keyed map with a value type.
    Map(Box<NodeType>),
    /// One of several alternatives. A union is compatible with a superset
    /// union, and a plain type is compatible with a union containing it.
    Union(Vec<NodeType>),
    /// Opaque named type; matches by name only.
    Custom(String),
    /// Marker for dynamic fan-out: the node produces a lazy sequence of T,
    /// each element becoming a parallel branch.
    Parallelizable(Box<NodeType>),
    /// Marker for dynamic fan-in: the parameter receives the collected
    /// results of a parallelizable branch.
    Collected(Box<NodeType>),
}

impl NodeType {
    /// Strips the dynamic fan-out/fan-in markers for edge comparisons: an
    /// expand node feeds each branch one element, and a collect parameter
    /// receives a list assembled by the scheduler.
    pub fn unwrap_dynamic(&self) -> &NodeType {
        match self {
            NodeType::Parallelizable(inner) | NodeType::Collected(inner) => inner,
            other => other,
        }
    }

    pub fn is_parallelizable(&self) -> bool {
        matches!(self, NodeType::Parallelizable(_))
    }

    pub fn is_collected(&self) -> bool {
        matches!(self, NodeType::Collected(_))
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Any => write!(f, "Any"),
            NodeType::Bool => write!(f, "Bool"),
            NodeType::Int => write!(f, "Int"),
            NodeType::Float => write!(f, "Float"),
            NodeType::Str => write!(f, "Str"),
            NodeType::List(e) => write!(f, "List[{e}]"),
            NodeType::Map(v) => write!(f, "Map[{v}]"),
            NodeType::Union(members) => {
                let names: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "Union[{}]", names.join(", "))
            }
            NodeType::Custom(name) => write!(f, "{name}"),
            NodeType::Parallelizable(e) => write!(f, "Parallelizable[{e}]"),
            NodeType::Collected(e) => write!(f, "Collected[{e}]"),
        }
    }
}

/// Checks whether a value of type `actual` can flow into a slot declared as
/// `expected`. Permissive by design: exact equality, `Any` on either side,
/// union membership/subset, and element-wise matching for containers.
pub fn types_match(expected: &NodeType, actual: &NodeType) -> bool {
    let expected = expected.unwrap_dynamic();
    let actual = actual.unwrap_dynamic();
    match (expected, actual) {
        (NodeType::Any, _) | (_, NodeType::Any) => true,
        (NodeType::Union(members), NodeType::Union(others)) => {
            // actual's alternatives must all be acceptable
            others.iter().all(|o| members.iter().any(|m| types_match(m, o)))
        }
        (NodeType::Union(members), single) => members.iter().any(|m| types_match(m, single)),
        (single, NodeType::Union(others)) => others.iter().all(|o| types_match(single, o)),
        (NodeType::List(a), NodeType::List(b)) => types_match(a, b),
        (NodeType::Map(a), NodeType::Map(b)) => types_match(a, b),
        (NodeType::Custom(a), NodeType::Custom(b)) => a == b,
        (a, b) => a == b,
    }
}

/// Returns the tighter of two compatible types, or `None` when they are
/// genuinely incompatible in both directions. Used to tighten the declared
/// type of a shared external input when two consumers disagree about how
/// general it is.
pub fn tighter_of(a: &NodeType, b: &NodeType) -> Option<NodeType> {
    if a == b {
        return Some(a.clone());
    }
    // Any is the loosest possible declaration
    if matches!(a, NodeType::Any) {
        return Some(b.clone());
    }
    if matches!(b, NodeType::Any) {
        return Some(a.clone());
    }
    let a_accepts_b = types_match(a, b);
    let b_accepts_a = types_match(b, a);
    match (a_accepts_b, b_accepts_a) {
        // b is a subset of a (e.g. union member), so b is tighter
        (true, false) => Some(b.clone()),
        (false, true) => Some(a.clone()),
        // mutually compatible but unequal (overlapping unions) -- keep the
        // narrower side when one has fewer alternatives
        (true, true) => match (a, b) {
            (NodeType::Union(ma), NodeType::Union(mb)) if mb.len() < ma.len() => Some(b.clone()),
            _ => Some(a.clone()),
        },
        (false, false) => None,
    }
}

/// Structural check of a runtime value against a declared type. This is the
/// default behavior behind the `do_validate_input` lifecycle method.
pub fn validate_value(expected: &NodeType, value: &Value) -> bool {
    match expected.unwrap_dynamic() {
        NodeType::Any | NodeType::Custom(_) => true,
        NodeType::Bool => value.is_boolean(),
        NodeType::Int => value.is_i64() || value.is_u64(),
        NodeType::Float => value.is_number(),
        NodeType::Str => value.is_string(),
        NodeType::List(elem) => value
            .as_array()
            .map(|items| items.iter().all(|v| validate_value(elem, v)))
            .unwrap_or(false),
        NodeType::Map(val_t) => value
            .as_object()
            .map(|map| map.values().all(|v| validate_value(val_t, v)))
            .unwrap_or(false),
        NodeType::Union(members) => members.iter().any(|m| validate_value(m, value)),
        // unwrap_dynamic never returns these
        NodeType::Parallelizable(_) | NodeType::Collected(_) => false,
    }
}
