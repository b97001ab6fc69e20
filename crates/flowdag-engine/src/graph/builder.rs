use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{info, warn};

use flowdag_core::error::{FlowError, Result};
use flowdag_core::types::DependencyKind;

use super::cycle::{combine, find_cycle};
use super::model::{GraphModel, NodeDecl};

/// Default wall-clock budget for a run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Turns the node declarations of one workflow into a validated [`GraphModel`].
pub struct GraphBuilder<I> {
    workflow: String,
    decls: Vec<NodeDecl<I>>,
    timeout: Duration,
}

impl<I> GraphBuilder<I> {
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            decls: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn node(mut self, decl: NodeDecl<I>) -> Self {
        self.decls.push(decl);
        self
    }

    pub fn nodes(mut self, decls: impl IntoIterator<Item = NodeDecl<I>>) -> Self {
        self.decls.extend(decls);
        self
    }

    /// Validate and freeze the graph.
    ///
    /// Fails on duplicate ids, dependencies naming undeclared nodes, or a cycle
    /// in the strong, weak or combined dependency graph.
    pub fn build(self) -> Result<GraphModel<I>> {
        let workflow = self.workflow;
        if self.decls.is_empty() {
            return Err(FlowError::EmptyWorkflow(workflow));
        }

        let mut order = Vec::with_capacity(self.decls.len());
        let mut nodes = HashMap::with_capacity(self.decls.len());
        for decl in self.decls {
            if nodes.contains_key(&decl.id) {
                return Err(FlowError::DuplicateNode {
                    workflow,
                    node: decl.id,
                });
            }
            order.push(decl.id.clone());
            nodes.insert(decl.id.clone(), decl);
        }

        let mut strong: HashMap<String, HashSet<String>> = HashMap::with_capacity(order.len());
        let mut weak: HashMap<String, HashSet<String>> = HashMap::with_capacity(order.len());
        let mut successors: HashMap<String, HashSet<String>> = HashMap::with_capacity(order.len());
        let mut end_nodes = HashSet::new();
        let mut start_node = None;

        for id in &order {
            let decl = &nodes[id];
            for dep in decl.depends_on.iter().chain(&decl.weak_depends_on) {
                if !nodes.contains_key(dep) {
                    return Err(FlowError::MissingDependency {
                        workflow,
                        node: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                successors.entry(dep.clone()).or_default().insert(id.clone());
            }
            strong.insert(id.clone(), decl.depends_on.iter().cloned().collect());
            weak.insert(id.clone(), decl.weak_depends_on.iter().cloned().collect());

            if decl.is_end {
                end_nodes.insert(id.clone());
            }
            if decl.is_start {
                if let Some(ref first) = start_node {
                    warn!(workflow = %workflow, first = %first, other = %id, "Multiple start nodes declared");
                } else {
                    start_node = Some(id.clone());
                }
            }
        }

        let combined = combine(&strong, &weak);
        for (kind, edges) in [
            (DependencyKind::Strong, &strong),
            (DependencyKind::Weak, &weak),
            (DependencyKind::Combined, &combined),
        ] {
            if let Some(path) = find_cycle(&order, edges) {
                warn!(workflow = %workflow, %kind, cycle = %path.join(" -> "), "Graph validation failed");
                return Err(FlowError::CycleDetected { workflow, kind });
            }
        }

        if end_nodes.is_empty() {
            warn!(workflow = %workflow, "No end node declared; runs can never finish");
        }

        info!(
            workflow = %workflow,
            nodes = order.len(),
            end_nodes = end_nodes.len(),
            "Graph validated"
        );

        Ok(GraphModel {
            workflow,
            order,
            nodes,
            strong,
            weak,
            successors,
            end_nodes,
            start_node,
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdag_test_utils::RecordingNode;

    fn decl(id: &str) -> NodeDecl<()> {
        NodeDecl::new(id, RecordingNode::shared())
    }

    fn diamond() -> GraphBuilder<()> {
        GraphBuilder::new("diamond")
            .node(decl("a").start())
            .node(decl("b").depends_on(["a"]))
            .node(decl("c").depends_on(["a"]).io())
            .node(decl("d").depends_on(["b", "c"]).end())
    }

    #[test]
    fn test_builds_diamond() {
        let graph = diamond().build().unwrap();
        assert_eq!(graph.workflow(), "diamond");
        assert_eq!(graph.node_ids(), &["a", "b", "c", "d"]);
        assert_eq!(graph.start_node(), Some("a"));
        assert!(graph.is_end("d"));
        assert_eq!(graph.timeout(), DEFAULT_TIMEOUT);

        let succ = graph.successors("a").unwrap();
        assert!(succ.contains("b") && succ.contains("c"));
        assert!(graph.weak_deps("d").unwrap().is_empty());
    }

    #[test]
    fn test_strong_cycle_names_workflow() {
        let err = GraphBuilder::new("loopy")
            .node(decl("a").depends_on(["b"]))
            .node(decl("b").depends_on(["a"]).end())
            .build()
            .unwrap_err();
        match err {
            FlowError::CycleDetected { workflow, kind } => {
                assert_eq!(workflow, "loopy");
                assert_eq!(kind, DependencyKind::Strong);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_weak_cycle() {
        let err = GraphBuilder::new("w")
            .node(decl("a").weak_depends_on(["b"]))
            .node(decl("b").weak_depends_on(["a"]).end())
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::CycleDetected { kind: DependencyKind::Weak, .. }));
    }

    #[test]
    fn test_combined_cycle() {
        let err = GraphBuilder::new("mixed")
            .node(decl("a").weak_depends_on(["b"]))
            .node(decl("b").depends_on(["a"]).end())
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::CycleDetected { kind: DependencyKind::Combined, .. }
        ));
    }

    #[test]
    fn test_missing_dependency() {
        let err = GraphBuilder::new("wf")
            .node(decl("a").depends_on(["ghost"]).end())
            .build()
            .unwrap_err();
        match err {
            FlowError::MissingDependency { node, dependency, .. } => {
                assert_eq!(node, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_and_empty() {
        let err = GraphBuilder::new("wf")
            .node(decl("a"))
            .node(decl("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateNode { .. }));

        let err = GraphBuilder::<()>::new("wf").build().unwrap_err();
        assert!(matches!(err, FlowError::EmptyWorkflow(_)));
    }

    #[test]
    fn test_no_end_node_still_builds() {
        let graph = GraphBuilder::new("open")
            .node(decl("a"))
            .build()
            .unwrap();
        assert!(graph.end_nodes().is_empty());
    }
}
