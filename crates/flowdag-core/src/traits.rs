use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::RunContext;
use crate::error::{FlowError, Result};
use crate::types::NodeKind;

/// Node body: one unit of work in a workflow graph.
///
/// `execute` may fail by returning an error; the engine captures it into the
/// node's result instead of propagating it. The lifecycle hooks are no-ops
/// unless overridden.
pub trait Node<I>: Send + Sync + 'static {
    /// Run the node. A returned value is stored as the node's output.
    fn execute<'a>(
        &'a self,
        input: &'a I,
        ctx: &'a RunContext,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>>>;

    fn on_start(&self, input: &I, ctx: &RunContext, node_id: &str) {
        let _ = (input, ctx, node_id);
    }

    /// Called after a successful `execute`, before the result is finalized.
    fn on_success(&self, input: &I, ctx: &RunContext, node_id: &str) {
        let _ = (input, ctx, node_id);
    }

    /// Called after `execute` failed or panicked.
    fn on_error(&self, input: &I, ctx: &RunContext, node_id: &str) {
        let _ = (input, ctx, node_id);
    }
}

/// Branch chooser. Picks the successors that stay alive after a node completes.
///
/// An empty set means "no pruning".
pub trait Chooser<I>: Send + Sync + 'static {
    fn choose_next(&self, input: &I, ctx: &RunContext) -> HashSet<String>;
}

impl<I, F> Chooser<I> for F
where
    F: Fn(&I, &RunContext) -> HashSet<String> + Send + Sync + 'static,
{
    fn choose_next(&self, input: &I, ctx: &RunContext) -> HashSet<String> {
        self(input, ctx)
    }
}

/// Adapter turning a synchronous closure into a [`Node`].
pub struct FnNode<F> {
    f: F,
}

impl<F> FnNode<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<I, F> Node<I> for FnNode<F>
where
    I: Send + Sync + 'static,
    F: Fn(&I, &RunContext, &str) -> Result<Option<serde_json::Value>> + Send + Sync + 'static,
{
    fn execute<'a>(
        &'a self,
        input: &'a I,
        ctx: &'a RunContext,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>>> {
        Box::pin(async move { (self.f)(input, ctx, node_id) })
    }
}

/// Wrap a synchronous closure as a shareable node body.
pub fn fn_node<I, F>(f: F) -> Arc<dyn Node<I>>
where
    I: Send + Sync + 'static,
    F: Fn(&I, &RunContext, &str) -> Result<Option<serde_json::Value>> + Send + Sync + 'static,
{
    Arc::new(FnNode::new(f))
}

/// Whole-run hook, invoked once before the first wave or once after the last.
pub type RunHook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Per-node hook, invoked with the node id and kind.
pub type NodeHook = Arc<dyn Fn(&str, NodeKind) + Send + Sync>;

/// Receives the run's error together with the original input and context.
pub type ExceptionHandler<I> = Arc<dyn Fn(&FlowError, &I, &RunContext) + Send + Sync>;
