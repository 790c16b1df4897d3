//! Two-pass graph construction: create nodes from function definitions,
//! then wire dependency edges, then backfill config-only nodes.
//!
//! The ordering is load-bearing. A function can be scanned before the
//! function it depends on, and config binds late as inputs, so edges cannot
//! be resolved while nodes are still being created.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::core::errors::{FlowError, Result};
use crate::lifecycle::adapter_set::LifecycleAdapterSet;

use super::function_graph::FunctionGraph;
use super::node::{InputSpec, Module, Node};
use super::types::{tighter_of, NodeType};

/// Builds a [`FunctionGraph`] from scanned modules and a configuration map.
///
/// Config wins over function definitions: a name present in `config` is
/// never built from a function. Name collisions between functions are an
/// error unless `allow_module_overrides` is set, in which case later modules
/// silently replace earlier ones (a global policy switch, not per-function).
pub fn build_function_graph(
    modules: &[Module],
    config: HashMap<String, Value>,
    adapters: Arc<LifecycleAdapterSet>,
    allow_module_overrides: bool,
) -> Result<FunctionGraph> {
    let mut nodes: HashMap<String, Node> = HashMap::new();

    // pass 1: one node per discovered function
    for module in modules {
        for def in &module.functions {
            if config.contains_key(&def.name) {
                debug!(function = %def.name, module = %module.name, "config supplies this name, skipping definition");
                continue;
            }
            let qualified = format!("{}.{}", module.name, def.name);
            if let Some(existing) = nodes.get(&def.name) {
                if !allow_module_overrides {
                    return Err(FlowError::DuplicateNode {
                        name: def.name.clone(),
                        first: existing
                            .originating_functions
                            .first()
                            .cloned()
                            .unwrap_or_else(|| def.name.clone()),
                        second: qualified,
                    });
                }
                debug!(node = %def.name, module = %module.name, "later module overrides earlier definition");
            }
            let mut node = Node::from_definition(def)?;
            node.originating_functions = vec![qualified];
            node.tags
                .insert("flowgraph.module".to_string(), module.name.clone());
            nodes.insert(def.name.clone(), node);
        }
    }

    // pass 2: resolve every declared input to a producer
    update_dependencies(&mut nodes, &adapters)?;

    // pass 3: remaining config keys become Any-typed external nodes, so
    // config can supply values consumed ad hoc (feature flags etc.)
    for key in config.keys() {
        if !nodes.contains_key(key) {
            nodes.insert(key.clone(), Node::from_config_key(key));
        }
    }

    info!(nodes = nodes.len(), modules = modules.len(), "function graph built");
    Ok(FunctionGraph::from_parts(nodes, config, adapters))
}

/// Wires dependency edges for every node's declared inputs. Separated from
/// node creation so graph-extension paths can re-run it over a merged map.
pub fn update_dependencies(
    nodes: &mut HashMap<String, Node>,
    adapters: &LifecycleAdapterSet,
) -> Result<()> {
    let mut names: Vec<String> = nodes.keys().cloned().collect();
    names.sort();
    for name in names {
        let params: Vec<(String, InputSpec)> = nodes[&name]
            .input_types
            .iter()
            .map(|(p, s)| (p.clone(), s.clone()))
            .collect();
        for (param, spec) in params {
            add_dependency(nodes, adapters, &name, &param, &spec)?;
        }
    }
    Ok(())
}

/// Resolves a single `consumer.param` input to its producer, synthesizing an
/// external node when none exists, tightening external types when two
/// consumers disagree compatibly, and recording the edge bidirectionally.
pub fn add_dependency(
    nodes: &mut HashMap<String, Node>,
    adapters: &LifecycleAdapterSet,
    consumer: &str,
    param: &str,
    spec: &InputSpec,
) -> Result<()> {
    let expected = &spec.node_type;
    let consumer_functions = nodes[consumer].originating_functions.clone();

    match nodes.get_mut(param) {
        Some(producer) => {
            let actual = producer.node_type.clone();
            if !adapters.check_edge_types_match(expected, &actual)? {
                if producer.is_external() {
                    // two functions sharing an externally supplied input
                    // with differing generality: tighten in place
                    if let Some(tight) = tighter_of(&actual, expected.unwrap_dynamic()) {
                        debug!(
                            input = %param,
                            from = %actual,
                            to = %tight,
                            "tightening external input type"
                        );
                        producer.set_type(tight)?;
                    } else {
                        return Err(incompatible(param, consumer, expected, producer, &actual));
                    }
                } else {
                    return Err(incompatible(param, consumer, expected, producer, &actual));
                }
            }
            if producer.is_external() {
                for f in &consumer_functions {
                    if !producer.originating_functions.contains(f) {
                        producer.originating_functions.push(f.clone());
                    }
                }
            }
            if !producer.depended_on_by.contains(&consumer.to_string()) {
                producer.depended_on_by.push(consumer.to_string());
            }
        }
        None => {
            // dangling reference: supplied at runtime or from config
            let mut external = Node::external(param, expected.unwrap_dynamic().clone());
            external.originating_functions = consumer_functions;
            external.depended_on_by.push(consumer.to_string());
            nodes.insert(param.to_string(), external);
        }
    }

    let consumer_node = nodes
        .get_mut(consumer)
        .ok_or_else(|| FlowError::internal(format!("consumer '{consumer}' vanished during wiring")))?;
    if !consumer_node.dependencies.contains(&param.to_string()) {
        consumer_node.dependencies.push(param.to_string());
    }
    Ok(())
}

fn incompatible(
    param: &str,
    consumer: &str,
    expected: &NodeType,
    producer: &Node,
    actual: &NodeType,
) -> FlowError {
    FlowError::IncompatibleTypes {
        name: param.to_string(),
        consumer: consumer.to_string(),
        expected: expected.to_string(),
        producer: producer
            .originating_functions
            .first()
            .cloned()
            .unwrap_or_else(|| producer.name.clone()),
        actual: actual.to_string(),
    }
}
