use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Which executor a node is routed to when dispatched inside a wave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Computation-heavy work, short and CPU-bound.
    #[default]
    Cpu,
    /// Network, file or database work that mostly waits.
    Io,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Cpu => write!(f, "cpu"),
            NodeKind::Io => write!(f, "io"),
        }
    }
}

/// Lifecycle state of a single node's result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skip,
}

/// Terminal and non-terminal states of a whole run.
///
/// `Finish`, `Error` and `Stalled` are sticky: once reached, nothing leaves them
/// except an after-run hook failure, which always forces `Error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineState {
    #[default]
    Init = 0,
    Running = 1,
    Finish = 2,
    Error = 3,
    Stalled = 4,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Finish | EngineState::Error | EngineState::Stalled)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EngineState::Running,
            2 => EngineState::Finish,
            3 => EngineState::Error,
            4 => EngineState::Stalled,
            _ => EngineState::Init,
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Init => "init",
            EngineState::Running => "running",
            EngineState::Finish => "finish",
            EngineState::Error => "error",
            EngineState::Stalled => "stalled",
        };
        f.write_str(s)
    }
}

/// Which edge set a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Strong,
    Weak,
    Combined,
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Strong => write!(f, "strong"),
            DependencyKind::Weak => write!(f, "weak"),
            DependencyKind::Combined => write!(f, "combined"),
        }
    }
}

/// Outcome of one node execution, stored per node id in the run context.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub state: NodeState,
    /// Value produced by the node body, if any.
    pub value: Option<serde_json::Value>,
    pub error: Option<Arc<FlowError>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeResult {
    pub fn new() -> Self {
        Self {
            state: NodeState::Pending,
            value: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// A result that only carries a value, used for data seeded by callers.
    pub fn with_value(value: serde_json::Value) -> Self {
        Self {
            value: Some(value),
            ..Self::new()
        }
    }

    /// Move to `Running` and restart the clock.
    pub fn begin(&mut self) {
        self.state = NodeState::Running;
        self.started_at = Utc::now();
        self.finished_at = None;
    }

    pub fn complete(&mut self, value: Option<serde_json::Value>) {
        if value.is_some() {
            self.value = value;
        }
        self.error = None;
        self.state = NodeState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: Arc<FlowError>) {
        self.error = Some(error);
        self.state = NodeState::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// Elapsed time between start and finish; `None` while unfinished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration()
            .map(|d| d.num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Reset for reuse.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_success(&self) -> bool {
        self.state == NodeState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state == NodeState::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.state == NodeState::Skip
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            NodeState::Completed | NodeState::Failed | NodeState::Skip
        )
    }
}

impl Default for NodeResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_roundtrips_through_u8() {
        for state in [
            EngineState::Init,
            EngineState::Running,
            EngineState::Finish,
            EngineState::Error,
            EngineState::Stalled,
        ] {
            assert_eq!(EngineState::from_u8(state.as_u8()), state);
        }
        assert!(EngineState::Stalled.is_terminal());
        assert!(!EngineState::Running.is_terminal());
    }

    #[test]
    fn test_node_result_lifecycle() {
        let mut result = NodeResult::new();
        assert_eq!(result.state, NodeState::Pending);
        assert!(result.duration().is_none());

        result.begin();
        assert_eq!(result.state, NodeState::Running);

        result.complete(Some(serde_json::json!(42)));
        assert!(result.is_success());
        assert!(result.is_terminal());
        assert_eq!(result.value, Some(serde_json::json!(42)));
        assert!(result.duration().is_some());
    }

    #[test]
    fn test_complete_keeps_value_written_by_body() {
        let mut result = NodeResult::with_value(serde_json::json!("seed"));
        result.begin();
        result.complete(None);
        assert_eq!(result.value, Some(serde_json::json!("seed")));
    }

    #[test]
    fn test_fail_and_reset() {
        let mut result = NodeResult::new();
        result.begin();
        result.fail(Arc::new(FlowError::node("bad input")));
        assert!(result.is_failed());
        assert_eq!(result.error.as_ref().map(|e| e.to_string()).as_deref(), Some("bad input"));

        result.reset();
        assert_eq!(result.state, NodeState::Pending);
        assert!(result.error.is_none());
        assert!(result.value.is_none());
    }

    #[test]
    fn test_node_kind_serde() {
        let kind: NodeKind = serde_json::from_str("\"io\"").unwrap();
        assert_eq!(kind, NodeKind::Io);
        assert_eq!(NodeKind::default(), NodeKind::Cpu);
    }
}
