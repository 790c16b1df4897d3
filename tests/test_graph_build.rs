//! Graph construction tests: node uniqueness, config precedence, external
//! type tightening, traversal, and cycle detection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use flowgraph::{
    build_function_graph, DefaultGraphExecutor, Driver, FlowError, FunctionDefinition,
    GraphExecutor, LifecycleAdapterSet, Module, Node, NodeType,
};

fn constant(name: &str, value: i64) -> FunctionDefinition {
    FunctionDefinition::builder(name)
        .returns(NodeType::Int)
        .compute(move |_| Ok(json!(value)))
        .build()
        .unwrap()
}

fn empty_adapters() -> Arc<LifecycleAdapterSet> {
    Arc::new(LifecycleAdapterSet::default())
}

/// Test that the same node name in two modules is rejected, naming both
/// offending function definitions.
#[tokio::test]
async fn duplicate_definitions_are_rejected() {
    let err = Driver::builder()
        .with_module(Module::new("alpha").with_function(constant("x", 1)))
        .with_module(Module::new("beta").with_function(constant("x", 2)))
        .build()
        .unwrap_err();
    match err {
        FlowError::DuplicateNode { name, first, second } => {
            assert_eq!(name, "x");
            assert_eq!(first, "alpha.x");
            assert_eq!(second, "beta.x");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Test that allow_module_overrides lets a later module silently replace an
/// earlier definition.
#[tokio::test]
async fn later_module_overrides_when_enabled() {
    let driver = Driver::builder()
        .with_module(Module::new("alpha").with_function(constant("x", 1)))
        .with_module(Module::new("beta").with_function(constant("x", 2)))
        .allow_module_overrides()
        .build()
        .unwrap();
    let results = driver
        .raw_execute(&["x".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(results["x"], json!(2));
}

/// Test that a config key wins over a function definition of the same name.
#[tokio::test]
async fn config_wins_over_function_definitions() {
    let module = Module::new("m").with_function(constant("x", 1)).with_function(
        FunctionDefinition::builder("doubled")
            .returns(NodeType::Int)
            .param("x", NodeType::Int)
            .compute(|kwargs| Ok(json!(kwargs["x"].as_i64().unwrap() * 2)))
            .build()
            .unwrap(),
    );
    let driver = Driver::builder()
        .with_module(module)
        .with_config_value("x", json!(5))
        .build()
        .unwrap();

    let node = driver.graph().get("x").unwrap();
    assert!(node.is_external());

    let results = driver
        .raw_execute(&["doubled".to_string()], &HashMap::new(), &HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(results["doubled"], json!(10));
}

/// Test that config keys no function consumes still appear as Any-typed
/// external nodes.
#[test]
fn unconsumed_config_keys_become_nodes() {
    let graph = build_function_graph(
        &[Module::new("m").with_function(constant("a", 1))],
        HashMap::from([("flag".to_string(), json!(true))]),
        empty_adapters(),
        false,
    )
    .unwrap();
    let node = graph.get("flag").unwrap();
    assert!(node.is_external());
    assert_eq!(node.node_type, NodeType::Any);
    assert_eq!(node.tags.get("flowgraph.source").map(String::as_str), Some("config"));
}

/// Test that a shared external input is tightened to the narrowest declared
/// type and records every contributing function, regardless of wiring order.
#[test]
fn shared_external_input_is_tightened() {
    let wide_consumer = FunctionDefinition::builder("format_raw")
        .returns(NodeType::Str)
        .param("raw", NodeType::Union(vec![NodeType::Int, NodeType::Str]))
        .compute(|kwargs| Ok(json!(kwargs["raw"].to_string())))
        .build()
        .unwrap();
    let narrow_consumer = FunctionDefinition::builder("bump_raw")
        .returns(NodeType::Int)
        .param("raw", NodeType::Int)
        .compute(|kwargs| Ok(json!(kwargs["raw"].as_i64().unwrap() + 1)))
        .build()
        .unwrap();

    for functions in [
        vec![wide_consumer.clone(), narrow_consumer.clone()],
        vec![narrow_consumer, wide_consumer],
    ] {
        let mut module = Module::new("m");
        for f in functions {
            module = module.with_function(f);
        }
        let graph = build_function_graph(&[module], HashMap::new(), empty_adapters(), false)
            .unwrap();
        let raw = graph.get("raw").unwrap();
        assert!(raw.is_external());
        assert_eq!(raw.node_type, NodeType::Int);
        assert!(raw.originating_functions.contains(&"m.format_raw".to_string()));
        assert!(raw.originating_functions.contains(&"m.bump_raw".to_string()));
    }
}

/// Test that a genuine type disagreement between a consumer and a standard
/// producer fails construction.
#[test]
fn incompatible_types_are_rejected() {
    let module = Module::new("m")
        .with_function(
            FunctionDefinition::builder("label")
                .returns(NodeType::Str)
                .compute(|_| Ok(json!("widget")))
                .build()
                .unwrap(),
        )
        .with_function(
            FunctionDefinition::builder("bump_label")
                .returns(NodeType::Int)
                .param("label", NodeType::Int)
                .compute(|kwargs| Ok(json!(kwargs["label"].as_i64().unwrap() + 1)))
                .build()
                .unwrap(),
        );
    let err = build_function_graph(&[module], HashMap::new(), empty_adapters(), false)
        .unwrap_err();
    match err {
        FlowError::IncompatibleTypes { name, consumer, .. } => {
            assert_eq!(name, "label");
            assert_eq!(consumer, "bump_label");
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn diamond_module() -> Module {
    Module::new("diamond")
        .with_function(constant("base", 1))
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
        )
}

/// Test that repeated upstream traversals of the same request return the
/// same closure.
#[test]
fn upstream_closure_is_idempotent() {
    let graph =
        build_function_graph(&[diamond_module()], HashMap::new(), empty_adapters(), false)
            .unwrap();
    let none: HashSet<String> = HashSet::new();
    let first = graph
        .get_upstream_nodes(&["sum".to_string()], Some(&none), &none)
        .unwrap();
    let second = graph
        .get_upstream_nodes(&["sum".to_string()], Some(&none), &none)
        .unwrap();
    assert_eq!(first.required, second.required);
    assert_eq!(first.user_inputs, second.user_inputs);

    let expected: HashSet<String> = ["base", "left", "right", "sum"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(first.required, expected);
}

/// Test that an optional dependency nothing supplies is pruned from the
/// runtime closure, but kept for static inspection.
#[test]
fn unsatisfied_optional_dependencies_are_pruned() {
    let module = Module::new("report").with_function(
        FunctionDefinition::builder("summary")
            .returns(NodeType::Int)
            .optional_param("enrichment", NodeType::Int, json!(0))
            .compute(|kwargs| Ok(json!(kwargs["enrichment"].as_i64().unwrap() + 1)))
            .build()
            .unwrap(),
    );
    let graph = build_function_graph(&[module], HashMap::new(), empty_adapters(), false)
        .unwrap();
    let none: HashSet<String> = HashSet::new();

    let pruned = graph
        .get_upstream_nodes(&["summary".to_string()], Some(&none), &none)
        .unwrap();
    assert!(!pruned.required.contains("enrichment"));

    let supplied: HashSet<String> = HashSet::from(["enrichment".to_string()]);
    let kept = graph
        .get_upstream_nodes(&["summary".to_string()], Some(&supplied), &none)
        .unwrap();
    assert!(kept.required.contains("enrichment"));

    let inspected = graph
        .get_upstream_nodes(&["summary".to_string()], None, &none)
        .unwrap();
    assert!(inspected.required.contains("enrichment"));
}

/// Test that every unknown requested name is reported at once, sorted.
#[test]
fn unknown_outputs_aggregate() {
    let graph =
        build_function_graph(&[diamond_module()], HashMap::new(), empty_adapters(), false)
            .unwrap();
    let none: HashSet<String> = HashSet::new();
    let err = graph
        .get_upstream_nodes(
            &["ghost_b".to_string(), "ghost_a".to_string()],
            None,
            &none,
        )
        .unwrap_err();
    match err {
        FlowError::UnknownOutputs { names } => {
            assert_eq!(names, vec!["ghost_a".to_string(), "ghost_b".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Test that a manually injected cycle is detected and reported with its
/// member names.
#[test]
fn cycles_are_detected_and_reported() {
    let x = Node::external("x", NodeType::Any)
        .rebuild()
        .dependencies(vec!["y".to_string()])
        .finish();
    let y = Node::external("y", NodeType::Any)
        .rebuild()
        .dependencies(vec!["x".to_string()])
        .finish();
    let graph = flowgraph::FunctionGraph::from_parts(
        HashMap::from([("x".to_string(), x), ("y".to_string(), y)]),
        HashMap::new(),
        empty_adapters(),
    );

    assert!(graph.is_cyclic());
    let cycles = graph.detect_cycles().unwrap();
    assert_eq!(cycles, vec![vec!["x".to_string(), "y".to_string()]]);

    let err = DefaultGraphExecutor.validate(&graph).unwrap_err();
    assert!(matches!(err, FlowError::Cycle { .. }));
}
