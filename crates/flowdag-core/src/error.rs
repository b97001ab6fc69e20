use thiserror::Error;

use crate::types::DependencyKind;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph construction errors
    #[error("Circular dependency detected in workflow '{workflow}' ({kind} dependencies)")]
    CycleDetected {
        workflow: String,
        kind: DependencyKind,
    },

    #[error("Missing node id in workflow '{workflow}': {node} depends on unknown node {dependency}")]
    MissingDependency {
        workflow: String,
        node: String,
        dependency: String,
    },

    #[error("Duplicate node id in workflow '{workflow}': {node}")]
    DuplicateNode { workflow: String, node: String },

    #[error("No nodes declared for workflow '{0}'")]
    EmptyWorkflow(String),

    #[error("Workflow not registered: {0}")]
    UnknownWorkflow(String),

    // Node errors
    #[error("{0}")]
    Node(String),

    #[error("Node execution failed: {node}: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Node panicked: {node}: {message}")]
    NodePanicked { node: String, message: String },

    // Run errors
    #[error("Run exceeded timeout of {timeout_ms}ms (elapsed {elapsed_ms}ms)")]
    Timeout { timeout_ms: u64, elapsed_ms: u64 },

    #[error("{phase} hook failed: {message}")]
    Hook { phase: HookPhase, message: String },

    #[error("Run stalled with no ready nodes; still pending: {}", pending.join(", "))]
    Stalled { pending: Vec<String> },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Shorthand for errors raised from inside a node body.
    pub fn node(message: impl Into<String>) -> Self {
        FlowError::Node(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FlowError::CycleDetected { .. }
                | FlowError::MissingDependency { .. }
                | FlowError::DuplicateNode { .. }
                | FlowError::EmptyWorkflow(_)
        )
    }
}

/// Which whole-run hook raised a [`FlowError::Hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Before,
    After,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::Before => write!(f, "Before-run"),
            HookPhase::After => write!(f, "After-run"),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_workflow() {
        let err = FlowError::CycleDetected {
            workflow: "ranking".into(),
            kind: DependencyKind::Combined,
        };
        let msg = err.to_string();
        assert!(msg.contains("'ranking'"));
        assert!(msg.contains("combined"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_stalled_lists_pending() {
        let err = FlowError::Stalled {
            pending: vec!["b".into(), "d".into()],
        };
        assert_eq!(
            err.to_string(),
            "Run stalled with no ready nodes; still pending: b, d"
        );
        assert!(!err.is_validation());
    }

    #[test]
    fn test_hook_phase_display() {
        let err = FlowError::Hook {
            phase: HookPhase::After,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "After-run hook failed: boom");
    }
}
