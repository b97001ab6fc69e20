use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use flowdag_core::traits::{Chooser, Node};
use flowdag_core::types::NodeKind;

/// A node as declared by the caller, before validation.
///
/// Dependencies are named by logical node id. A declaration carries no
/// workflow name; the [`GraphBuilder`](super::GraphBuilder) it is handed to
/// decides which workflow it belongs to.
pub struct NodeDecl<I> {
    /// Unique identifier within the workflow.
    pub id: String,
    pub kind: NodeKind,
    /// Every one of these must complete (or be pruned) before this node runs.
    pub depends_on: Vec<String>,
    /// At least one of these must complete before this node runs.
    pub weak_depends_on: Vec<String>,
    /// Informational only; readiness is driven by dependencies.
    pub is_start: bool,
    pub is_end: bool,
    pub body: Arc<dyn Node<I>>,
    pub chooser: Option<Arc<dyn Chooser<I>>>,
}

impl<I> NodeDecl<I> {
    /// Create a CPU node with no dependencies.
    pub fn new(id: impl Into<String>, body: Arc<dyn Node<I>>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Cpu,
            depends_on: vec![],
            weak_depends_on: vec![],
            is_start: false,
            is_end: false,
            body,
            chooser: None,
        }
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Route the node to the I/O executor.
    pub fn io(self) -> Self {
        self.with_kind(NodeKind::Io)
    }

    /// Add strong dependencies.
    pub fn depends_on<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add weak ("any-of") dependencies.
    pub fn weak_depends_on<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.weak_depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    pub fn end(mut self) -> Self {
        self.is_end = true;
        self
    }

    pub fn with_chooser(mut self, chooser: Arc<dyn Chooser<I>>) -> Self {
        self.chooser = Some(chooser);
        self
    }
}

impl<I> Clone for NodeDecl<I> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            depends_on: self.depends_on.clone(),
            weak_depends_on: self.weak_depends_on.clone(),
            is_start: self.is_start,
            is_end: self.is_end,
            body: Arc::clone(&self.body),
            chooser: self.chooser.clone(),
        }
    }
}

impl<I> std::fmt::Debug for NodeDecl<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDecl")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("depends_on", &self.depends_on)
            .field("weak_depends_on", &self.weak_depends_on)
            .field("is_start", &self.is_start)
            .field("is_end", &self.is_end)
            .field("has_chooser", &self.chooser.is_some())
            .finish()
    }
}

/// Validated, immutable graph of one workflow.
///
/// Shared read-only (behind an `Arc`) by every concurrent run of the workflow.
/// Node order is the declaration order and drives the dense state index.
pub struct GraphModel<I> {
    pub(crate) workflow: String,
    pub(crate) order: Vec<String>,
    pub(crate) nodes: HashMap<String, NodeDecl<I>>,
    pub(crate) strong: HashMap<String, HashSet<String>>,
    pub(crate) weak: HashMap<String, HashSet<String>>,
    /// Reverse edges over strong ∪ weak: node id -> nodes that depend on it.
    pub(crate) successors: HashMap<String, HashSet<String>>,
    pub(crate) end_nodes: HashSet<String>,
    pub(crate) start_node: Option<String>,
    pub(crate) timeout: Duration,
}

impl<I> GraphModel<I> {
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Node ids in declaration order.
    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&NodeDecl<I>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn strong_deps(&self, id: &str) -> Option<&HashSet<String>> {
        self.strong.get(id)
    }

    pub fn weak_deps(&self, id: &str) -> Option<&HashSet<String>> {
        self.weak.get(id)
    }

    pub fn successors(&self, id: &str) -> Option<&HashSet<String>> {
        self.successors.get(id)
    }

    pub fn end_nodes(&self) -> &HashSet<String> {
        &self.end_nodes
    }

    pub fn is_end(&self, id: &str) -> bool {
        self.end_nodes.contains(id)
    }

    pub fn start_node(&self) -> Option<&str> {
        self.start_node.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<I> std::fmt::Debug for GraphModel<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphModel")
            .field("workflow", &self.workflow)
            .field("nodes", &self.order)
            .field("end_nodes", &self.end_nodes)
            .field("start_node", &self.start_node)
            .field("timeout", &self.timeout)
            .finish()
    }
}
