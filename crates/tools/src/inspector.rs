use serde_json::Value;
use statesync_common::ChangedKeys;
use statesync_kernel::{Binding, KernelError, StateEngine, StateObserver};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// State inspector for developer tooling.
///
/// Keeps a bounded history of change events while attached, and provides
/// read-only queries against the engine for debugging panels.
pub struct StateInspector {
    capacity: usize,
    history: RefCell<VecDeque<ChangeRecord>>,
    sequence: Cell<u64>,
}

/// One observed write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// 1-based count of writes seen by this inspector.
    pub sequence: u64,
    pub changed: ChangedKeys,
    /// Top-level key count of the state after the write.
    pub key_count: usize,
}

impl StateInspector {
    /// Create an inspector keeping at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: RefCell::new(VecDeque::new()),
            sequence: Cell::new(0),
        }
    }

    /// Attach a new inspector to `engine`. Keep the binding alive for as
    /// long as recording should continue.
    pub fn attach(
        engine: &StateEngine,
        capacity: usize,
    ) -> Result<(Rc<Self>, Binding), KernelError> {
        let inspector = Rc::new(Self::new(capacity));
        let mut binding = Binding::new(inspector.clone());
        binding.attach(engine)?;
        Ok((inspector, binding))
    }

    /// Recorded changes, oldest first.
    pub fn history(&self) -> Vec<ChangeRecord> {
        self.history.borrow().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<ChangeRecord> {
        self.history.borrow().back().cloned()
    }

    /// Writes observed since creation, including ones already evicted.
    pub fn total_changes(&self) -> u64 {
        self.sequence.get()
    }

    pub fn clear(&self) {
        self.history.borrow_mut().clear();
    }

    /// Produce a summary of the engine.
    pub fn summary(engine: &StateEngine) -> StateSummary {
        let state = engine.snapshot();
        let persistence = engine.persistence();
        StateSummary {
            key_count: state.as_object().map_or(0, |m| m.len()),
            subscriber_count: engine.subscriber_count(),
            persistence_enabled: persistence.is_enabled(),
            stored: persistence.exists(),
            storage: persistence.adapter().name().to_owned(),
            storage_key: persistence.key().to_owned(),
        }
    }

    /// Describe the value at `path`.
    pub fn inspect(engine: &StateEngine, path: &str) -> Option<PathInfo> {
        engine.get_state_at(path).map(|value| PathInfo {
            path: path.to_owned(),
            kind: kind_of(&value),
            children: match &value {
                Value::Object(map) => map.len(),
                Value::Array(items) => items.len(),
                _ => 0,
            },
            value,
        })
    }

    /// List the top-level keys of the state.
    pub fn list_keys(engine: &StateEngine) -> Vec<String> {
        engine
            .snapshot()
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl StateObserver for StateInspector {
    fn state_changed(&self, state: &Value, changed: &ChangedKeys) {
        let sequence = self.sequence.get() + 1;
        self.sequence.set(sequence);
        let mut history = self.history.borrow_mut();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(ChangeRecord {
            sequence,
            changed: changed.clone(),
            key_count: state.as_object().map_or(0, |m| m.len()),
        });
        tracing::trace!(sequence, %changed, "inspector recorded change");
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Summary of engine state for the inspector.
#[derive(Debug, Clone)]
pub struct StateSummary {
    pub key_count: usize,
    pub subscriber_count: usize,
    pub persistence_enabled: bool,
    pub stored: bool,
    pub storage: String,
    pub storage_key: String,
}

impl std::fmt::Display for StateSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "State: keys={} subscribers={} persistence={} storage={}:{} stored={}",
            self.key_count,
            self.subscriber_count,
            if self.persistence_enabled { "on" } else { "off" },
            self.storage,
            self.storage_key,
            self.stored,
        )
    }
}

/// Detailed info about the value at one path.
#[derive(Debug, Clone)]
pub struct PathInfo {
    pub path: String,
    pub kind: &'static str,
    /// Entry count for mappings and sequences, zero otherwise.
    pub children: usize,
    pub value: Value,
}

impl std::fmt::Display for PathInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            "mapping" | "sequence" => write!(
                f,
                "{} ({}, {} entries) = {}",
                self.path, self.kind, self.children, self.value
            ),
            _ => write!(f, "{} ({}) = {}", self.path, self.kind, self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_empty_engine() {
        let engine = StateEngine::new();
        let summary = StateInspector::summary(&engine);
        assert_eq!(summary.key_count, 0);
        assert_eq!(summary.subscriber_count, 0);
        assert!(!summary.persistence_enabled);
        assert!(!summary.stored);
        assert_eq!(summary.storage, "memory");
    }

    #[test]
    fn summary_with_state_and_inspector() {
        let engine = StateEngine::new();
        let (_inspector, _binding) = StateInspector::attach(&engine, 8).unwrap();
        engine.set_state(json!({"a": 1, "b": [1, 2]})).unwrap();

        let summary = StateInspector::summary(&engine);
        assert_eq!(summary.key_count, 2);
        assert_eq!(summary.subscriber_count, 1);
    }

    #[test]
    fn records_history_in_order() {
        let engine = StateEngine::new();
        let (inspector, _binding) = StateInspector::attach(&engine, 8).unwrap();

        engine.set_state(json!({"a": 1})).unwrap();
        engine.set_state(json!({"a": 1})).unwrap(); // no change, not recorded
        engine.set_state(json!({"b": 2, "c": 3})).unwrap();

        let history = inspector.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sequence, 1);
        assert_eq!(history[0].changed, ChangedKeys::single("a"));
        assert_eq!(history[1].key_count, 3);
        assert_eq!(inspector.last().unwrap().sequence, 2);
    }

    #[test]
    fn history_is_bounded() {
        let engine = StateEngine::new();
        let (inspector, _binding) = StateInspector::attach(&engine, 2).unwrap();
        for i in 0..5 {
            engine.set_state(json!({"n": i})).unwrap();
        }
        let history = inspector.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sequence, 4);
        assert_eq!(inspector.total_changes(), 5);

        inspector.clear();
        assert!(inspector.history().is_empty());
    }

    #[test]
    fn stops_recording_after_binding_dropped() {
        let engine = StateEngine::new();
        let (inspector, binding) = StateInspector::attach(&engine, 4).unwrap();
        engine.set_state(json!({"a": 1})).unwrap();
        drop(binding);
        engine.set_state(json!({"a": 2})).unwrap();
        assert_eq!(inspector.total_changes(), 1);
    }

    #[test]
    fn inspect_path_found() {
        let engine = StateEngine::new();
        engine
            .set_state(json!({"todos": [{"id": 1}, {"id": 2}]}))
            .unwrap();

        let info = StateInspector::inspect(&engine, "todos").unwrap();
        assert_eq!(info.kind, "sequence");
        assert_eq!(info.children, 2);

        let leaf = StateInspector::inspect(&engine, "todos.1.id").unwrap();
        assert_eq!(leaf.value, json!(2));
        assert_eq!(format!("{leaf}"), "todos.1.id (number) = 2");
    }

    #[test]
    fn inspect_path_not_found() {
        let engine = StateEngine::new();
        assert!(StateInspector::inspect(&engine, "missing.path").is_none());
    }

    #[test]
    fn list_keys() {
        let engine = StateEngine::new();
        engine.set_state(json!({"b": 1, "a": 2})).unwrap();
        assert_eq!(StateInspector::list_keys(&engine), vec!["a", "b"]);
    }

    #[test]
    fn summary_display() {
        let engine = StateEngine::new();
        let s = format!("{}", StateInspector::summary(&engine));
        assert!(s.contains("keys=0"));
        assert!(s.contains("persistence=off"));
    }
}
