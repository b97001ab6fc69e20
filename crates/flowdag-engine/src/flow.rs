use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use flowdag_core::config::{EngineConfig, FlowConfig};
use flowdag_core::context::RunContext;
use flowdag_core::error::{FlowError, Result};
use flowdag_core::traits::{ExceptionHandler, NodeHook, RunHook};
use flowdag_core::types::EngineState;

use crate::engine::{DagEngine, EngineHooks, RunOutcome};
use crate::executor::Executors;
use crate::graph::{GraphBuilder, GraphModel, NodeDecl};
use crate::pool::{CollectionPool, ContextPool};

/// Per-invocation callbacks.
pub struct RunOptions<I> {
    pub before: Option<RunHook>,
    pub after: Option<RunHook>,
    pub before_node: Option<NodeHook>,
    pub after_node: Option<NodeHook>,
    /// Called once, with the captured error, when the run ends in `Error`.
    pub on_error: Option<ExceptionHandler<I>>,
}

impl<I> Default for RunOptions<I> {
    fn default() -> Self {
        Self {
            before: None,
            after: None,
            before_node: None,
            after_node: None,
            on_error: None,
        }
    }
}

impl<I> RunOptions<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before(mut self, hook: RunHook) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn after(mut self, hook: RunHook) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn before_node(mut self, hook: NodeHook) -> Self {
        self.before_node = Some(hook);
        self
    }

    pub fn after_node(mut self, hook: NodeHook) -> Self {
        self.after_node = Some(hook);
        self
    }

    pub fn on_error(mut self, handler: ExceptionHandler<I>) -> Self {
        self.on_error = Some(handler);
        self
    }

    fn split(self) -> (EngineHooks, Option<ExceptionHandler<I>>) {
        let hooks = EngineHooks {
            before: self.before,
            after: self.after,
            before_node: self.before_node,
            after_node: self.after_node,
        };
        (hooks, self.on_error)
    }
}

/// Process-wide entry point: owns the registered workflows, their validated
/// graphs, the shared pools and the executors.
///
/// Each graph is built once and cached; every run gets a fresh [`DagEngine`]
/// bound to the cached graph and a pooled [`RunContext`].
pub struct FlowRunner<I> {
    engine: EngineConfig,
    executors: Executors,
    contexts: ContextPool,
    collections: CollectionPool,
    declarations: DashMap<String, Vec<NodeDecl<I>>>,
    graphs: DashMap<String, Arc<GraphModel<I>>>,
}

impl<I: Send + Sync + 'static> FlowRunner<I> {
    /// Build the runner and its pools from config, and start the evictors.
    pub fn new(config: &FlowConfig, executors: Executors) -> Self {
        let eviction = &config.pool.eviction;
        let runner = Self::with_pools(
            config.engine.clone(),
            executors,
            ContextPool::new(config.pool.context, eviction),
            CollectionPool::new(config.pool.collection, eviction),
        );
        runner.start_evictors();
        runner
    }

    /// Build the runner around existing pools. Evictors are left as they are.
    pub fn with_pools(
        engine: EngineConfig,
        executors: Executors,
        contexts: ContextPool,
        collections: CollectionPool,
    ) -> Self {
        Self {
            engine,
            executors,
            contexts,
            collections,
            declarations: DashMap::new(),
            graphs: DashMap::new(),
        }
    }

    /// Register (or replace) a workflow. The graph is validated immediately.
    pub fn register(&self, workflow: impl Into<String>, decls: Vec<NodeDecl<I>>) -> Result<()> {
        let workflow = workflow.into();
        let graph = Arc::new(self.build_graph(&workflow, decls.clone())?);

        self.declarations.insert(workflow.clone(), decls);
        self.graphs.insert(workflow.clone(), graph);
        info!(workflow = %workflow, "Workflow registered");
        Ok(())
    }

    pub fn workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self.declarations.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// The cached graph for `workflow`, rebuilt from its declarations if the
    /// cache was cleared.
    pub fn graph(&self, workflow: &str) -> Result<Arc<GraphModel<I>>> {
        if let Some(graph) = self.graphs.get(workflow) {
            return Ok(Arc::clone(graph.value()));
        }

        let decls = self
            .declarations
            .get(workflow)
            .map(|decls| decls.value().clone())
            .ok_or_else(|| FlowError::UnknownWorkflow(workflow.to_string()))?;

        match self.graphs.entry(workflow.to_string()) {
            Entry::Occupied(cached) => Ok(Arc::clone(cached.get())),
            Entry::Vacant(slot) => {
                let graph = Arc::new(self.build_graph(workflow, decls)?);
                slot.insert(Arc::clone(&graph));
                debug!(workflow = %workflow, "Graph rebuilt from declarations");
                Ok(graph)
            }
        }
    }

    fn build_graph(&self, workflow: &str, decls: Vec<NodeDecl<I>>) -> Result<GraphModel<I>> {
        GraphBuilder::new(workflow)
            .timeout(self.engine.timeout())
            .nodes(decls)
            .build()
    }

    /// A fresh engine bound to the cached graph of `workflow`.
    pub fn engine(&self, workflow: &str) -> Result<DagEngine<I>> {
        let graph = self.graph(workflow)?;
        Ok(
            DagEngine::new(graph, self.executors.clone(), self.collections.clone())
                .with_callbacks(self.engine.enable_callbacks)
                .with_timeout(self.engine.timeout()),
        )
    }

    /// Run `workflow` on a pooled context.
    ///
    /// Only lookup and validation problems are returned as `Err`; how the run
    /// itself ended is reported by the outcome's state.
    pub async fn run(&self, workflow: &str, input: Arc<I>, options: RunOptions<I>) -> Result<RunOutcome> {
        let engine = self.engine(workflow)?;
        let ctx = self.contexts.borrow();
        let outcome = Self::drive(engine, &input, &ctx, options).await;
        self.contexts.release(ctx);
        Ok(outcome)
    }

    /// Run `workflow` on a caller-owned context, which keeps every node result
    /// after the run.
    pub async fn run_with_context(
        &self,
        workflow: &str,
        input: Arc<I>,
        ctx: &Arc<RunContext>,
        options: RunOptions<I>,
    ) -> Result<RunOutcome> {
        let engine = self.engine(workflow)?;
        Ok(Self::drive(engine, &input, ctx, options).await)
    }

    async fn drive(
        engine: DagEngine<I>,
        input: &Arc<I>,
        ctx: &Arc<RunContext>,
        options: RunOptions<I>,
    ) -> RunOutcome {
        let (hooks, on_error) = options.split();
        let mut engine = engine.with_hooks(hooks);
        let outcome = engine.execute(input, ctx).await;

        if outcome.state == EngineState::Error {
            if let (Some(handler), Some(error)) = (on_error, outcome.error.as_ref()) {
                let handled = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler(error, input.as_ref(), ctx.as_ref());
                }));
                if handled.is_err() {
                    warn!(workflow = %outcome.workflow, "Exception handler panicked");
                }
            }
        }
        outcome
    }

    /// Drop every cached graph. Registered workflows rebuild on next use.
    pub fn clear_cache(&self) {
        let cleared = self.graphs.len();
        self.graphs.clear();
        info!(cleared, "Graph cache cleared");
    }

    pub fn cached_graphs(&self) -> usize {
        self.graphs.len()
    }

    /// Retune both pools at once.
    pub fn set_pool_intervals(&self, eviction_interval: Duration, evictable_idle: Duration) {
        self.contexts.set_eviction_interval(eviction_interval);
        self.contexts.set_evictable_idle_time(evictable_idle);
        self.collections.set_eviction_interval(eviction_interval);
        self.collections.set_evictable_idle_time(evictable_idle);
    }

    pub fn start_evictors(&self) {
        self.contexts.start_evictor();
        self.collections.start_evictor();
    }

    pub fn stop_evictors(&self) {
        self.contexts.stop_evictor();
        self.collections.stop_evictor();
    }

    pub fn contexts(&self) -> &ContextPool {
        &self.contexts
    }

    pub fn collections(&self) -> &CollectionPool {
        &self.collections
    }
}
