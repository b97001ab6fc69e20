use std::collections::{HashSet, VecDeque};

use tracing::debug;

use flowdag_core::context::RunContext;
use flowdag_core::types::NodeState;

use crate::graph::GraphModel;
use crate::pool::CollectionPool;
use crate::state::StateTracker;

/// Active nodes that cannot be reached from `selected`.
///
/// Reachability is a BFS over successors through strong and weak edges.
/// End nodes always count as reachable. Only nodes still active are
/// candidates, so nothing already settled is touched.
pub fn unreachable_nodes<I>(
    graph: &GraphModel<I>,
    tracker: &StateTracker,
    selected: &HashSet<String>,
    pool: &CollectionPool,
) -> Vec<String> {
    let mut reachable = pool.set();
    let mut queue: VecDeque<&str> = VecDeque::with_capacity(selected.len());

    for id in selected {
        if reachable.insert(id.clone()) {
            queue.push_back(id);
        }
    }
    while let Some(current) = queue.pop_front() {
        let Some(successors) = graph.successors(current) else {
            continue;
        };
        for next in successors {
            if reachable.insert(next.clone()) {
                queue.push_back(next);
            }
        }
    }
    reachable.extend(graph.end_nodes().iter().cloned());

    tracker
        .active_nodes()
        .into_iter()
        .filter(|id| !reachable.contains(id))
        .collect()
}

/// Apply a branch decision made by `chooser_node`.
///
/// Marks the selection, then prunes every unreachable active node: pruned,
/// skipped, removed from the active set and its result slot set to `Skip`.
/// An empty selection prunes nothing. Returns the pruned ids.
pub fn apply_selection<I>(
    graph: &GraphModel<I>,
    tracker: &mut StateTracker,
    ctx: &RunContext,
    chooser_node: &str,
    selected: &HashSet<String>,
    pool: &CollectionPool,
) -> Vec<String> {
    if selected.is_empty() {
        return Vec::new();
    }
    for id in selected {
        tracker.mark_selected(id);
    }

    let pruned = unreachable_nodes(graph, tracker, selected, pool);
    for id in &pruned {
        tracker.mark_pruned(id);
        tracker.mark_skipped(id);
        tracker.deactivate(id);
        ctx.update_result(id, |slot| slot.state = NodeState::Skip);
    }

    debug!(
        node_id = %chooser_node,
        selected = ?selected,
        pruned = ?pruned,
        "Branch selection applied"
    );
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdag_core::config::{EvictionConfig, PoolSizing};
    use flowdag_test_utils::RecordingNode;

    use crate::graph::{GraphBuilder, NodeDecl};

    fn pool() -> CollectionPool {
        CollectionPool::new(
            PoolSizing {
                max_size: 8,
                initial_size: 0,
                min_idle: 0,
            },
            &EvictionConfig::default(),
        )
    }

    fn decl(id: &str) -> NodeDecl<()> {
        NodeDecl::new(id, RecordingNode::shared())
    }

    /// a -> {b, c}; b -> b2; {b2, c} -> d(end); c -> e
    fn branching() -> GraphModel<()> {
        GraphBuilder::new("branching")
            .node(decl("a").start())
            .node(decl("b").depends_on(["a"]))
            .node(decl("b2").depends_on(["b"]))
            .node(decl("c").depends_on(["a"]))
            .node(decl("e").depends_on(["c"]))
            .node(decl("d").depends_on(["b2"]).weak_depends_on(["c"]).end())
            .build()
            .unwrap()
    }

    fn after_a(graph: &GraphModel<()>) -> StateTracker {
        let mut tracker = StateTracker::new(graph.node_ids());
        tracker.mark_completed("a");
        tracker.deactivate("a");
        tracker
    }

    #[test]
    fn test_prunes_unselected_branch_but_not_end() {
        let graph = branching();
        let mut tracker = after_a(&graph);
        let ctx = RunContext::new();
        let selected = HashSet::from(["c".to_string()]);

        let pruned = apply_selection(&graph, &mut tracker, &ctx, "a", &selected, &pool());
        assert_eq!(pruned, vec!["b", "b2"]);
        assert!(tracker.is_pruned("b") && tracker.is_skipped("b") && !tracker.is_active("b"));
        assert!(!tracker.is_pruned("d"));
        assert!(!tracker.is_pruned("e"));
        assert!(tracker.is_selected("c"));
        assert!(ctx.result("b2").unwrap().is_skipped());
    }

    #[test]
    fn test_empty_selection_prunes_nothing() {
        let graph = branching();
        let mut tracker = after_a(&graph);
        let ctx = RunContext::new();

        let pruned = apply_selection(&graph, &mut tracker, &ctx, "a", &HashSet::new(), &pool());
        assert!(pruned.is_empty());
        assert_eq!(tracker.active_count(), 5);
    }

    #[test]
    fn test_settled_nodes_are_not_candidates() {
        let graph = branching();
        let mut tracker = after_a(&graph);
        tracker.mark_completed("b");
        tracker.deactivate("b");

        let selected = HashSet::from(["c".to_string()]);
        let unreachable = unreachable_nodes(&graph, &tracker, &selected, &pool());
        assert_eq!(unreachable, vec!["b2"]);
        assert!(!tracker.is_pruned("b"));
    }

    #[test]
    fn test_second_prune_skips_already_pruned() {
        let graph = branching();
        let mut tracker = after_a(&graph);
        let ctx = RunContext::new();
        let pool = pool();

        apply_selection(&graph, &mut tracker, &ctx, "a", &HashSet::from(["c".to_string()]), &pool);
        let again =
            apply_selection(&graph, &mut tracker, &ctx, "a", &HashSet::from(["c".to_string()]), &pool);
        assert!(again.is_empty());
    }
}
