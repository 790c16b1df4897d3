//! Lifecycle layer tests: method exclusivity, point-kind checks, validator
//! aggregation, async hook dispatch, and method replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use flowgraph::{
    AsyncLifecycleAdapter, Driver, FlowError, FunctionDefinition, FunctionGraph,
    LifecycleAdapter, LifecycleAdapterSet, LifecyclePoint, Module, Node, NodeType,
    Result as FlowResult,
};

fn one_node_module() -> Module {
    Module::new("m").with_function(
        FunctionDefinition::builder("answer")
            .returns(NodeType::Int)
            .compute(|_| Ok(json!(41)))
            .build()
            .unwrap(),
    )
}

struct ConstantExecute {
    label: &'static str,
    value: i64,
}

impl LifecycleAdapter for ConstantExecute {
    fn name(&self) -> String {
        self.label.to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::DoNodeExecute]
    }

    fn do_node_execute(
        &self,
        _run_id: &str,
        _node: &Node,
        _kwargs: &HashMap<String, Value>,
    ) -> FlowResult<Value> {
        Ok(json!(self.value))
    }
}

/// Test that two adapters claiming the same method point are rejected,
/// naming both.
#[test]
fn method_points_are_exclusive() {
    let err = LifecycleAdapterSet::new(
        vec![
            Arc::new(ConstantExecute { label: "first", value: 1 }) as Arc<dyn LifecycleAdapter>,
            Arc::new(ConstantExecute { label: "second", value: 2 }),
        ],
        Vec::new(),
    )
    .unwrap_err();
    match err {
        FlowError::MethodConflict { point, first, second } => {
            assert_eq!(point, LifecyclePoint::DoNodeExecute);
            assert_eq!(first, "first");
            assert_eq!(second, "second");
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct AsyncConstantExecute;

#[async_trait]
impl AsyncLifecycleAdapter for AsyncConstantExecute {
    fn name(&self) -> String {
        "AsyncConstantExecute".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::DoNodeExecute]
    }

    async fn do_node_execute(
        &self,
        _run_id: &str,
        _node: &Node,
        _kwargs: &HashMap<String, Value>,
    ) -> FlowResult<Value> {
        Ok(json!(99))
    }
}

/// Test that a method point cannot be owned by a sync adapter and an async
/// adapter at the same time.
#[test]
fn method_points_are_exclusive_across_tracks() {
    let err = LifecycleAdapterSet::new(
        vec![
            Arc::new(ConstantExecute { label: "sync_exec", value: 1 })
                as Arc<dyn LifecycleAdapter>,
        ],
        vec![Arc::new(AsyncConstantExecute) as Arc<dyn AsyncLifecycleAdapter>],
    )
    .unwrap_err();
    match err {
        FlowError::MethodConflict { point, first, second } => {
            assert_eq!(point, LifecyclePoint::DoNodeExecute);
            assert_eq!(first, "sync_exec");
            assert_eq!(second, "AsyncConstantExecute");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Test that asking the adapter set about the wrong kind of point fails
/// instead of silently answering.
#[test]
fn point_kind_mismatches_are_programmer_errors() {
    let set = LifecycleAdapterSet::default();
    assert!(set.does_hook(LifecyclePoint::DoNodeExecute).is_err());
    assert!(set.does_method(LifecyclePoint::PreNodeExecute).is_err());
    assert!(set.does_validation(LifecyclePoint::DoBuildResult).is_err());

    assert!(!set.does_hook(LifecyclePoint::PreNodeExecute).unwrap());
    assert!(!set.does_method(LifecyclePoint::DoNodeExecute).unwrap());
    assert!(!set.does_validation(LifecyclePoint::ValidateNode).unwrap());
}

struct RejectNodes;

impl LifecycleAdapter for RejectNodes {
    fn name(&self) -> String {
        "RejectNodes".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::ValidateNode]
    }

    fn validate_node(&self, node: &Node) -> (bool, Option<String>) {
        (false, Some(format!("node '{}' is unwelcome", node.name)))
    }
}

struct RejectGraph;

impl LifecycleAdapter for RejectGraph {
    fn name(&self) -> String {
        "RejectGraph".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::ValidateGraph]
    }

    fn validate_graph(&self, _graph: &FunctionGraph) -> (bool, Option<String>) {
        (false, Some("graph is unwelcome".to_string()))
    }
}

/// Test that node and graph validator failures aggregate into one error.
#[test]
fn validator_failures_aggregate() {
    let err = Driver::builder()
        .with_module(one_node_module())
        .with_adapter(Arc::new(RejectNodes))
        .with_adapter(Arc::new(RejectGraph))
        .build()
        .unwrap_err();
    match err {
        FlowError::Validation { failures } => {
            assert_eq!(failures.len(), 2);
            let combined = failures.join("\n");
            assert!(combined.contains("RejectNodes"));
            assert!(combined.contains("RejectGraph"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct AsyncNodeCounter {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl AsyncLifecycleAdapter for AsyncNodeCounter {
    fn name(&self) -> String {
        "AsyncNodeCounter".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::PostNodeExecute]
    }

    async fn post_node_execute(
        &self,
        _run_id: &str,
        _node: &Node,
        _kwargs: &HashMap<String, Value>,
        _success: bool,
        _result: Option<&Value>,
        _error: Option<&FlowError>,
        _task_id: Option<&str>,
    ) -> FlowResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Test that async hook adapters are dispatched alongside sync ones.
#[tokio::test]
async fn async_hooks_fire_per_node() {
    let calls = Arc::new(AtomicU32::new(0));
    let module = Module::new("m")
        .with_function(
            FunctionDefinition::builder("a")
                .returns(NodeType::Int)
                .compute(|_| Ok(json!(1)))
                .build()
                .unwrap(),
        )
        .with_function(
            FunctionDefinition::builder("b")
                .returns(NodeType::Int)
                .param("a", NodeType::Int)
                .compute(|kwargs| Ok(json!(kwargs["a"].as_i64().unwrap() + 1)))
                .build()
                .unwrap(),
        );
    let driver = Driver::builder()
        .with_module(module)
        .with_async_adapter(Arc::new(AsyncNodeCounter { calls: calls.clone() }))
        .build()
        .unwrap();
    driver
        .raw_execute(&["b".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

struct BadAsyncMethod;

#[async_trait]
impl AsyncLifecycleAdapter for BadAsyncMethod {
    fn name(&self) -> String {
        "BadAsyncMethod".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::DoBuildResult]
    }
}

/// Test that async adapters may only claim the node-execution method.
#[test]
fn async_adapters_cannot_own_sync_methods() {
    let err = LifecycleAdapterSet::new(
        Vec::new(),
        vec![Arc::new(BadAsyncMethod) as Arc<dyn AsyncLifecycleAdapter>],
    )
    .unwrap_err();
    assert!(matches!(err, FlowError::Internal { .. }));
}

struct CountingBuilder;

impl LifecycleAdapter for CountingBuilder {
    fn name(&self) -> String {
        "CountingBuilder".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::DoBuildResult]
    }

    fn do_build_result(&self, outputs: &HashMap<String, Value>) -> FlowResult<Value> {
        Ok(json!({ "output_count": outputs.len() }))
    }
}

/// Test that a registered do_build_result method replaces the default
/// JSON-object combination.
#[tokio::test]
async fn build_result_method_replaces_default() {
    let driver = Driver::builder()
        .with_module(one_node_module())
        .with_adapter(Arc::new(CountingBuilder))
        .build()
        .unwrap();
    let combined = driver
        .execute(&["answer".to_string()], &HashMap::new(), &HashMap::new())
        .await
        .unwrap();
    assert_eq!(combined, json!({ "output_count": 1 }));
}

/// Test that a registered do_node_execute method replaces the callable.
#[tokio::test]
async fn node_execute_method_replaces_default() {
    let driver = Driver::builder()
        .with_module(one_node_module())
        .with_adapter(Arc::new(ConstantExecute { label: "const", value: 42 }))
        .build()
        .unwrap();
    let results = driver
        .raw_execute(&["answer".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(results["answer"], json!(42));
}
