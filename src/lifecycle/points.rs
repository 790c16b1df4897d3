//! The closed registry of lifecycle points.
//!
//! Hooks may be implemented by any number of adapters (all run, registration
//! order preserved). Methods replace a default behavior and may be owned by
//! at most one adapter. Validators are static checks composed additively.

use std::fmt;

/// Classification of a lifecycle point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    Hook,
    Method,
    Validator,
}

/// Every lifecycle point the engine dispatches, declared once. An adapter
/// states which points it implements; conformance is checked when the
/// adapter set is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePoint {
    // hooks
    PreDoAnything,
    PostGraphConstruct,
    PreGraphExecute,
    PreTaskExecute,
    PreNodeExecute,
    PostNodeExecute,
    PostTaskExecute,
    PostGraphExecute,
    // methods
    DoCheckEdgeTypesMatch,
    DoValidateInput,
    DoNodeExecute,
    DoRemoteExecute,
    DoBuildResult,
    // validators
    ValidateNode,
    ValidateGraph,
}

impl LifecyclePoint {
    pub const HOOKS: [LifecyclePoint; 8] = [
        LifecyclePoint::PreDoAnything,
        LifecyclePoint::PostGraphConstruct,
        LifecyclePoint::PreGraphExecute,
        LifecyclePoint::PreTaskExecute,
        LifecyclePoint::PreNodeExecute,
        LifecyclePoint::PostNodeExecute,
        LifecyclePoint::PostTaskExecute,
        LifecyclePoint::PostGraphExecute,
    ];

    pub const METHODS: [LifecyclePoint; 5] = [
        LifecyclePoint::DoCheckEdgeTypesMatch,
        LifecyclePoint::DoValidateInput,
        LifecyclePoint::DoNodeExecute,
        LifecyclePoint::DoRemoteExecute,
        LifecyclePoint::DoBuildResult,
    ];

    pub const VALIDATORS: [LifecyclePoint; 2] =
        [LifecyclePoint::ValidateNode, LifecyclePoint::ValidateGraph];

    pub fn kind(&self) -> PointKind {
        match self {
            LifecyclePoint::PreDoAnything
            | LifecyclePoint::PostGraphConstruct
            | LifecyclePoint::PreGraphExecute
            | LifecyclePoint::PreTaskExecute
            | LifecyclePoint::PreNodeExecute
            | LifecyclePoint::PostNodeExecute
            | LifecyclePoint::PostTaskExecute
            | LifecyclePoint::PostGraphExecute => PointKind::Hook,
            LifecyclePoint::DoCheckEdgeTypesMatch
            | LifecyclePoint::DoValidateInput
            | LifecyclePoint::DoNodeExecute
            | LifecyclePoint::DoRemoteExecute
            | LifecyclePoint::DoBuildResult => PointKind::Method,
            LifecyclePoint::ValidateNode | LifecyclePoint::ValidateGraph => PointKind::Validator,
        }
    }

    /// The stable wire name of this point, the contract surface adapters are
    /// written against.
    pub fn name(&self) -> &'static str {
        match self {
            LifecyclePoint::PreDoAnything => "pre_do_anything",
            LifecyclePoint::PostGraphConstruct => "post_graph_construct",
            LifecyclePoint::PreGraphExecute => "pre_graph_execute",
            LifecyclePoint::PreTaskExecute => "pre_task_execute",
            LifecyclePoint::PreNodeExecute => "pre_node_execute",
            LifecyclePoint::PostNodeExecute => "post_node_execute",
            LifecyclePoint::PostTaskExecute => "post_task_execute",
            LifecyclePoint::PostGraphExecute => "post_graph_execute",
            LifecyclePoint::DoCheckEdgeTypesMatch => "do_check_edge_types_match",
            LifecyclePoint::DoValidateInput => "do_validate_input",
            LifecyclePoint::DoNodeExecute => "do_node_execute",
            LifecyclePoint::DoRemoteExecute => "do_remote_execute",
            LifecyclePoint::DoBuildResult => "do_build_result",
            LifecyclePoint::ValidateNode => "validate_node",
            LifecyclePoint::ValidateGraph => "validate_graph",
        }
    }
}

impl fmt::Display for LifecyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_point_has_exactly_one_kind() {
        for p in LifecyclePoint::HOOKS {
            assert_eq!(p.kind(), PointKind::Hook);
        }
        for p in LifecyclePoint::METHODS {
            assert_eq!(p.kind(), PointKind::Method);
        }
        for p in LifecyclePoint::VALIDATORS {
            assert_eq!(p.kind(), PointKind::Validator);
        }
    }
}
