//! Run-scoped execution state: the shared result cache, task statuses, and
//! fan-out bookkeeping.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use crate::core::errors::{FlowError, Result};

use super::task::TaskStatus;

/// Write-once-per-key store of computed node values, seeded with overrides
/// and inputs before any task runs. A task writes its outputs once, after
/// which they are read-only for all consumers; no finer locking is needed
/// beyond the concurrent map itself.
#[derive(Debug, Default, Clone)]
pub struct ResultCache {
    data: Arc<DashMap<String, Value>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-loads user-supplied values. Later seeds win over earlier ones,
    /// so callers seed config, then inputs, then overrides.
    pub fn seed(&self, values: &HashMap<String, Value>) {
        for (key, value) in values {
            self.data.insert(key.clone(), value.clone());
        }
    }

    /// Writes a computed value. Double writes indicate a scheduler bug; the
    /// first value is kept.
    pub fn insert(&self, name: &str, value: Value) {
        if self.data.contains_key(name) {
            warn!(node = %name, "ignoring second write to result cache");
            return;
        }
        self.data.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.data.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    /// Final read: exactly the requested names, erroring on anything a
    /// failed or abandoned branch never produced.
    pub fn take_outputs(&self, final_vars: &[String]) -> Result<HashMap<String, Value>> {
        let mut outputs = HashMap::new();
        for name in final_vars {
            match self.get(name) {
                Some(value) => {
                    outputs.insert(name.clone(), value);
                }
                None => {
                    return Err(FlowError::MissingResult { name: name.clone() });
                }
            }
        }
        Ok(outputs)
    }

    /// Snapshot view for node kwarg resolution.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Everything the scheduler needs to drive one run to completion.
pub struct ExecutionState {
    pub run_id: String,
    pub cache: ResultCache,
    /// task id -> status
    pub statuses: DashMap<String, TaskStatus>,
    /// sink node name -> (element index -> value), gathered from block
    /// instances for the paired collect node.
    pub block_outputs: DashMap<String, BTreeMap<usize, Value>>,
}

impl ExecutionState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            cache: ResultCache::new(),
            statuses: DashMap::new(),
            block_outputs: DashMap::new(),
        }
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.statuses.get(task_id).map(|entry| *entry.value())
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) {
        self.statuses.insert(task_id.to_string(), status);
    }

    /// Records one block instance's sink output for later collection.
    pub fn record_block_output(&self, sink: &str, index: usize, value: Value) {
        self.block_outputs
            .entry(sink.to_string())
            .or_default()
            .insert(index, value);
    }

    /// Assembles the ordered fan-in array for a sink node.
    pub fn collected_array(&self, sink: &str) -> Value {
        let values: Vec<Value> = self
            .block_outputs
            .get(sink)
            .map(|entry| entry.value().values().cloned().collect())
            .unwrap_or_default();
        Value::Array(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_cache_is_write_once() {
        let cache = ResultCache::new();
        cache.insert("a", json!(1));
        cache.insert("a", json!(2));
        assert_eq!(cache.get("a"), Some(json!(1)));
    }

    #[test]
    fn collected_array_orders_by_index() {
        let state = ExecutionState::new("run");
        state.record_block_output("s", 2, json!("c"));
        state.record_block_output("s", 0, json!("a"));
        state.record_block_output("s", 1, json!("b"));
        assert_eq!(state.collected_array("s"), json!(["a", "b", "c"]));
    }
}
