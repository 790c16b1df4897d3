//! Default executor tests: dependency-order execution, memoization,
//! overrides, inputs, optional defaults, and failure propagation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use flowgraph::{
    Driver, FlowError, FunctionDefinition, GracefulErrorAdapter, LifecycleAdapter,
    LifecyclePoint, Module, Node, NodeType, Result as FlowResult,
};

/// a -> b -> c chain where every node bumps its own call counter.
fn counted_chain(
    a_calls: Arc<AtomicU32>,
    b_calls: Arc<AtomicU32>,
    c_calls: Arc<AtomicU32>,
) -> Module {
    Module::new("chain")
        .with_function(
            FunctionDefinition::builder("a")
                .returns(NodeType::Int)
                .compute(move |_| {
                    a_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                })
                .build()
                .unwrap(),
        )
        .with_function(
            FunctionDefinition::builder("b")
                .returns(NodeType::Int)
                .param("a", NodeType::Int)
                .compute(move |kwargs| {
                    b_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(kwargs["a"].as_i64().unwrap() + 1))
                })
                .build()
                .unwrap(),
        )
        .with_function(
            FunctionDefinition::builder("c")
                .returns(NodeType::Int)
                .param("b", NodeType::Int)
                .compute(move |kwargs| {
                    c_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(kwargs["b"].as_i64().unwrap() * 2))
                })
                .build()
                .unwrap(),
        )
}

/// Test that a dependency chain resolves end to end, each node exactly once.
#[tokio::test]
async fn chain_executes_each_node_once() {
    let (a, b, c) = (
        Arc::new(AtomicU32::new(0)),
        Arc::new(AtomicU32::new(0)),
        Arc::new(AtomicU32::new(0)),
    );
    let driver = Driver::builder()
        .with_module(counted_chain(a.clone(), b.clone(), c.clone()))
        .build()
        .unwrap();
    let results = driver
        .raw_execute(&["c".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(results["c"], json!(4));
    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 1);
    assert_eq!(c.load(Ordering::SeqCst), 1);
}

/// Test that an override short-circuits the overridden node and its entire
/// upstream.
#[tokio::test]
async fn overrides_short_circuit_upstream() {
    let (a, b, c) = (
        Arc::new(AtomicU32::new(0)),
        Arc::new(AtomicU32::new(0)),
        Arc::new(AtomicU32::new(0)),
    );
    let driver = Driver::builder()
        .with_module(counted_chain(a.clone(), b.clone(), c.clone()))
        .build()
        .unwrap();
    let overrides = HashMap::from([("b".to_string(), json!(10))]);
    let results = driver
        .raw_execute(&["c".to_string()], &overrides, &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(results["c"], json!(20));
    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(b.load(Ordering::SeqCst), 0);
    assert_eq!(c.load(Ordering::SeqCst), 1);
}

/// Test that a dependency shared by two branches is computed once.
#[tokio::test]
async fn shared_dependencies_are_memoized() {
    let base_calls = Arc::new(AtomicU32::new(0));
    let counter = base_calls.clone();
    let module = Module::new("diamond")
        .with_function(
            FunctionDefinition::builder("base")
                .returns(NodeType::Int)
                .compute(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                })
                .build()
                .unwrap(),
        )
        .with_function(
            FunctionDefinition::builder("left")
                .returns(NodeType::Int)
                .param("base", NodeType::Int)
                .compute(|kwargs| Ok(json!(kwargs["base"].as_i64().unwrap() + 1)))
                .build()
                .unwrap(),
        )
        .with_function(
            FunctionDefinition::builder("right")
                .returns(NodeType::Int)
                .param("base", NodeType::Int)
                .compute(|kwargs| Ok(json!(kwargs["base"].as_i64().unwrap() + 2)))
                .build()
                .unwrap(),
        )
        .with_function(
            FunctionDefinition::builder("sum")
                .returns(NodeType::Int)
                .param("left", NodeType::Int)
                .param("right", NodeType::Int)
                .compute(|kwargs| {
                    Ok(json!(
                        kwargs["left"].as_i64().unwrap() + kwargs["right"].as_i64().unwrap()
                    ))
                })
                .build()
                .unwrap(),
        );
    let driver = Driver::builder().with_module(module).build().unwrap();
    let results = driver
        .raw_execute(&["sum".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(results["sum"], json!(5));
    assert_eq!(base_calls.load(Ordering::SeqCst), 1);
}

fn doubler_module() -> Module {
    Module::new("m").with_function(
        FunctionDefinition::builder("doubled")
            .returns(NodeType::Int)
            .param("x", NodeType::Int)
            .compute(|kwargs| Ok(json!(kwargs["x"].as_i64().unwrap() * 2)))
            .build()
            .unwrap(),
    )
}

/// Test that runtime inputs satisfy external nodes and can themselves be
/// requested back.
#[tokio::test]
async fn inputs_satisfy_external_nodes() {
    let driver = Driver::builder().with_module(doubler_module()).build().unwrap();
    let inputs = HashMap::from([("x".to_string(), json!(21))]);
    let results = driver
        .raw_execute(
            &["doubled".to_string(), "x".to_string()],
            &HashMap::new(),
            &inputs,
            None,
        )
        .await
        .unwrap();
    assert_eq!(results["doubled"], json!(42));
    assert_eq!(results["x"], json!(21));
}

/// Test that every missing required input is reported at once.
#[tokio::test]
async fn missing_inputs_are_reported_together() {
    let module = Module::new("m").with_function(
        FunctionDefinition::builder("sum")
            .returns(NodeType::Int)
            .param("x", NodeType::Int)
            .param("y", NodeType::Int)
            .compute(|kwargs| {
                Ok(json!(kwargs["x"].as_i64().unwrap() + kwargs["y"].as_i64().unwrap()))
            })
            .build()
            .unwrap(),
    );
    let driver = Driver::builder().with_module(module).build().unwrap();
    let err = driver
        .raw_execute(&["sum".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap_err();
    match err {
        FlowError::InvalidInputs { failures } => {
            assert_eq!(failures.len(), 2);
            assert!(failures[0].contains("'x'"));
            assert!(failures[1].contains("'y'"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Test that a supplied input failing type validation is rejected before
/// anything executes.
#[tokio::test]
async fn mistyped_inputs_are_rejected() {
    let driver = Driver::builder().with_module(doubler_module()).build().unwrap();
    let inputs = HashMap::from([("x".to_string(), json!("twenty-one"))]);
    let err = driver
        .raw_execute(&["doubled".to_string()], &HashMap::new(), &inputs, None)
        .await
        .unwrap_err();
    match err {
        FlowError::InvalidInputs { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("'x'"));
            assert!(failures[0].contains("Int"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Test that an optional parameter falls back to its declared default and
/// picks up a supplied value.
#[tokio::test]
async fn optional_defaults_apply() {
    let module = Module::new("m").with_function(
        FunctionDefinition::builder("score")
            .returns(NodeType::Int)
            .optional_param("bonus", NodeType::Int, json!(5))
            .compute(|kwargs| Ok(json!(kwargs["bonus"].as_i64().unwrap() + 1)))
            .build()
            .unwrap(),
    );
    let driver = Driver::builder().with_module(module).build().unwrap();

    let defaulted = driver
        .raw_execute(&["score".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(defaulted["score"], json!(6));

    let inputs = HashMap::from([("bonus".to_string(), json!(10))]);
    let supplied = driver
        .raw_execute(&["score".to_string()], &HashMap::new(), &inputs, None)
        .await
        .unwrap();
    assert_eq!(supplied["score"], json!(11));
}

/// Test that an application error surfaces with the failing node's name.
#[tokio::test]
async fn node_failures_name_the_node() {
    let module = Module::new("m").with_function(
        FunctionDefinition::builder("flaky")
            .returns(NodeType::Int)
            .compute(|_| Err(anyhow::anyhow!("boom")))
            .build()
            .unwrap(),
    );
    let driver = Driver::builder().with_module(module).build().unwrap();
    let err = driver
        .raw_execute(&["flaky".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap_err();
    match err {
        FlowError::NodeExecution { node, .. } => assert_eq!(node, "flaky"),
        other => panic!("unexpected error: {other}"),
    }
}

/// Test that the graceful-error adapter substitutes its sentinel for a
/// failed node and propagates it downstream.
#[tokio::test]
async fn graceful_adapter_substitutes_sentinel() {
    let module = Module::new("m")
        .with_function(
            FunctionDefinition::builder("flaky")
                .returns(NodeType::Int)
                .compute(|_| Err(anyhow::anyhow!("boom")))
                .build()
                .unwrap(),
        )
        .with_function(
            FunctionDefinition::builder("relay")
                .returns(NodeType::Any)
                .param("flaky", NodeType::Int)
                .compute(|kwargs| Ok(kwargs["flaky"].clone()))
                .build()
                .unwrap(),
        );
    let driver = Driver::builder()
        .with_module(module)
        .with_adapter(Arc::new(GracefulErrorAdapter::default()))
        .build()
        .unwrap();
    let results = driver
        .raw_execute(&["relay".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(results["relay"], Value::Null);
}

struct NodeRecorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl LifecycleAdapter for NodeRecorder {
    fn name(&self) -> String {
        "NodeRecorder".to_string()
    }

    fn implements(&self) -> &'static [LifecyclePoint] {
        &[LifecyclePoint::PreNodeExecute, LifecyclePoint::PostNodeExecute]
    }

    fn pre_node_execute(
        &self,
        _run_id: &str,
        node: &Node,
        _kwargs: &HashMap<String, Value>,
        _task_id: Option<&str>,
    ) -> FlowResult<()> {
        self.events.lock().unwrap().push(format!("pre:{}", node.name));
        Ok(())
    }

    fn post_node_execute(
        &self,
        _run_id: &str,
        node: &Node,
        _kwargs: &HashMap<String, Value>,
        success: bool,
        _result: Option<&Value>,
        _error: Option<&FlowError>,
        _task_id: Option<&str>,
    ) -> FlowResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("post:{}:{}", node.name, success));
        Ok(())
    }
}

/// Test that node hooks bracket each node in dependency order.
#[tokio::test]
async fn node_hooks_bracket_execution() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c) = (
        Arc::new(AtomicU32::new(0)),
        Arc::new(AtomicU32::new(0)),
        Arc::new(AtomicU32::new(0)),
    );
    let driver = Driver::builder()
        .with_module(counted_chain(a, b, c))
        .with_adapter(Arc::new(NodeRecorder {
            events: events.clone(),
        }))
        .build()
        .unwrap();
    driver
        .raw_execute(&["b".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    let recorded = events.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec!["pre:a", "post:a:true", "pre:b", "post:b:true"]
    );
}
