use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::types::{NodeResult, NodeState};

/// Per-invocation scratch space threaded through every node of a run.
///
/// Holds one [`NodeResult`] slot per node id plus a free-form key/value map
/// for data shared between nodes, stored as JSON values.
/// A context is owned by exactly one run at a time; it is pooled between runs
/// and cleared on both borrow and release.
#[derive(Debug, Default)]
pub struct RunContext {
    results: RwLock<HashMap<String, NodeResult>>,
    data: RwLock<HashMap<String, serde_json::Value>>,
    current_node: Mutex<Option<String>>,
    borrowed_at: Option<Instant>,
    returned_at: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a node's result slot, replacing any previous one.
    pub fn put_result(&self, node_id: impl Into<String>, result: NodeResult) {
        self.results.write().insert(node_id.into(), result);
    }

    /// Snapshot of a node's result slot.
    pub fn result(&self, node_id: &str) -> Option<NodeResult> {
        self.results.read().get(node_id).cloned()
    }

    pub fn has_result(&self, node_id: &str) -> bool {
        self.results.read().contains_key(node_id)
    }

    /// Mutate a node's result slot in place, creating it first if absent.
    pub fn update_result<R>(&self, node_id: &str, f: impl FnOnce(&mut NodeResult) -> R) -> R {
        let mut results = self.results.write();
        if let Some(slot) = results.get_mut(node_id) {
            return f(slot);
        }
        let slot = results.entry(node_id.to_string()).or_default();
        f(slot)
    }

    pub fn update_node_state(&self, node_id: &str, state: NodeState) {
        if let Some(slot) = self.results.write().get_mut(node_id) {
            slot.state = state;
        }
    }

    /// Record a value as a node's output. Node bodies call this with their own id.
    pub fn put_node_value(&self, node_id: &str, value: serde_json::Value) {
        self.update_result(node_id, |slot| slot.value = Some(value));
    }

    /// The value a node produced, if it produced one.
    pub fn node_value(&self, node_id: &str) -> Option<serde_json::Value> {
        self.results
            .read()
            .get(node_id)
            .and_then(|slot| slot.value.clone())
    }

    pub fn put_data(&self, key: impl Into<String>, value: serde_json::Value) {
        self.data.write().insert(key.into(), value);
    }

    pub fn set_str(&self, key: impl Into<String>, value: impl Into<String>) {
        self.put_data(key, serde_json::Value::String(value.into()));
    }

    pub fn get_data(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn contains_data(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn remove_data(&self, key: &str) -> Option<serde_json::Value> {
        self.data.write().remove(key)
    }

    /// Copy of the shared data map.
    pub fn data_snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }

    pub fn set_current_node(&self, node_id: Option<&str>) {
        *self.current_node.lock() = node_id.map(str::to_string);
    }

    /// Id of the node currently running on this context, if any.
    pub fn current_node(&self) -> Option<String> {
        self.current_node.lock().clone()
    }

    /// Drop all results, data and the current-node marker. Pool timestamps survive.
    pub fn clear(&self) {
        self.results.write().clear();
        self.data.write().clear();
        *self.current_node.lock() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty() && self.data.read().is_empty()
    }

    pub fn mark_borrowed(&mut self, at: Instant) {
        self.borrowed_at = Some(at);
    }

    pub fn mark_returned(&mut self, at: Instant) {
        self.returned_at = Some(at);
    }

    pub fn borrowed_at(&self) -> Option<Instant> {
        self.borrowed_at
    }

    pub fn returned_at(&self) -> Option<Instant> {
        self.returned_at
    }

    /// How long the context has been sitting unused. Zero while in use or never returned.
    pub fn idle_time(&self) -> Duration {
        match (self.returned_at, self.borrowed_at) {
            (Some(returned), Some(borrowed)) if borrowed > returned => Duration::ZERO,
            (Some(returned), _) => returned.elapsed(),
            (None, _) => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_result_creates_slot_once() {
        let ctx = RunContext::new();
        ctx.update_result("a", |slot| slot.begin());
        ctx.update_result("a", |slot| slot.complete(Some(serde_json::json!(1))));

        let slot = ctx.result("a").unwrap();
        assert!(slot.is_success());
        assert_eq!(ctx.node_value("a"), Some(serde_json::json!(1)));
    }

    #[test]
    fn test_data_map() {
        let ctx = RunContext::new();
        ctx.set_str("algorithm", "white_box");
        assert_eq!(ctx.get_str("algorithm").as_deref(), Some("white_box"));
        assert!(ctx.contains_data("algorithm"));
        assert_eq!(
            ctx.remove_data("algorithm"),
            Some(serde_json::json!("white_box"))
        );
        assert!(!ctx.contains_data("algorithm"));
        assert!(ctx.get_str("missing").is_none());

        ctx.put_data("limit", serde_json::json!(3));
        let snapshot = ctx.data_snapshot();
        ctx.clear();
        assert_eq!(snapshot.get("limit"), Some(&serde_json::json!(3)));
        assert!(ctx.data_snapshot().is_empty());
    }

    #[test]
    fn test_clear_empties_everything() {
        let ctx = RunContext::new();
        ctx.put_node_value("a", serde_json::json!("x"));
        ctx.put_data("k", serde_json::json!(true));
        ctx.set_current_node(Some("a"));
        assert!(!ctx.is_empty());

        ctx.clear();
        assert!(ctx.is_empty());
        assert!(ctx.current_node().is_none());
    }

    #[test]
    fn test_update_node_state_ignores_missing_slot() {
        let ctx = RunContext::new();
        ctx.update_node_state("ghost", NodeState::Skip);
        assert!(!ctx.has_result("ghost"));

        ctx.put_result("a", NodeResult::new());
        ctx.update_node_state("a", NodeState::Skip);
        assert!(ctx.result("a").unwrap().is_skipped());
    }

    #[test]
    fn test_idle_time() {
        let mut ctx = RunContext::new();
        assert_eq!(ctx.idle_time(), Duration::ZERO);

        let now = Instant::now();
        ctx.mark_returned(now);
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.idle_time() >= Duration::from_millis(5));

        ctx.mark_borrowed(Instant::now());
        assert_eq!(ctx.idle_time(), Duration::ZERO);
    }
}
