use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use flowdag_core::context::RunContext;
use flowdag_core::error::FlowError;
use flowdag_core::traits::{Chooser, Node};
use flowdag_core::types::{NodeKind, NodeResult};

use crate::graph::NodeDecl;

/// Runs one node body through its lifecycle and captures the outcome.
///
/// `execute` never fails and never unwinds: errors and panics from the body or
/// its hooks end up in the returned [`NodeResult`].
pub struct NodeRunner<I> {
    id: String,
    kind: NodeKind,
    body: Arc<dyn Node<I>>,
    chooser: Option<Arc<dyn Chooser<I>>>,
}

impl<I> NodeRunner<I> {
    pub fn new(id: impl Into<String>, kind: NodeKind, body: Arc<dyn Node<I>>) -> Self {
        Self {
            id: id.into(),
            kind,
            body,
            chooser: None,
        }
    }

    pub fn from_decl(decl: &NodeDecl<I>) -> Self {
        Self {
            id: decl.id.clone(),
            kind: decl.kind,
            body: Arc::clone(&decl.body),
            chooser: decl.chooser.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn has_chooser(&self) -> bool {
        self.chooser.is_some()
    }
}

impl<I: Send + Sync + 'static> NodeRunner<I> {
    pub async fn execute(&self, input: &I, ctx: &RunContext) -> NodeResult {
        let id = self.id.as_str();
        ctx.set_current_node(Some(id));
        ctx.update_result(id, NodeResult::begin);

        let outcome = AssertUnwindSafe(async {
            self.body.on_start(input, ctx, id);
            let value = self.body.execute(input, ctx, id).await?;
            self.body.on_success(input, ctx, id);
            Ok::<_, FlowError>(value)
        })
        .catch_unwind()
        .await;

        let result = match outcome {
            Ok(Ok(value)) => ctx.update_result(id, |slot| {
                slot.complete(value);
                slot.clone()
            }),
            Ok(Err(err)) => self.fail(input, ctx, err),
            Err(panic) => {
                let err = FlowError::NodePanicked {
                    node: self.id.clone(),
                    message: panic_message(&*panic),
                };
                self.fail(input, ctx, err)
            }
        };

        ctx.set_current_node(None);
        debug!(
            node_id = %self.id,
            state = ?result.state,
            elapsed_ms = result.duration_ms(),
            "Node finished"
        );
        result
    }

    fn fail(&self, input: &I, ctx: &RunContext, err: FlowError) -> NodeResult {
        let hook = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.body.on_error(input, ctx, &self.id);
        }));
        if hook.is_err() {
            warn!(node_id = %self.id, "on_error hook panicked");
        }

        let err = Arc::new(err);
        ctx.update_result(&self.id, |slot| {
            slot.fail(err);
            slot.clone()
        })
    }

    /// Ask the node's chooser which successors stay alive.
    ///
    /// Empty when the node has no chooser or the chooser panicked.
    pub fn choose_next(&self, input: &I, ctx: &RunContext) -> HashSet<String> {
        let Some(ref chooser) = self.chooser else {
            return HashSet::new();
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| chooser.choose_next(input, ctx))) {
            Ok(selected) => selected,
            Err(panic) => {
                warn!(
                    node_id = %self.id,
                    error = %panic_message(&*panic),
                    "Branch chooser panicked, no pruning"
                );
                HashSet::new()
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
