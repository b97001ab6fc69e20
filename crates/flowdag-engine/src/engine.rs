use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowdag_core::context::RunContext;
use flowdag_core::error::{FlowError, HookPhase};
use flowdag_core::traits::{NodeHook, RunHook};
use flowdag_core::types::{EngineState, NodeKind, NodeResult};

use crate::executor::Executors;
use crate::graph::GraphModel;
use crate::pool::CollectionPool;
use crate::prune;
use crate::runner::NodeRunner;
use crate::state::StateTracker;

/// Optional callbacks around a run and around each node.
#[derive(Clone, Default)]
pub struct EngineHooks {
    /// Runs once before the first wave. A failure aborts the run.
    pub before: Option<RunHook>,
    /// Runs once after the last wave, whatever the outcome.
    pub after: Option<RunHook>,
    pub before_node: Option<NodeHook>,
    /// Runs after a node completes successfully, before branch pruning.
    pub after_node: Option<NodeHook>,
}

/// Live view of a run's state, readable from other tasks while it executes.
#[derive(Debug, Clone, Default)]
pub struct RunStatus {
    inner: Arc<StatusInner>,
}

#[derive(Debug, Default)]
struct StatusInner {
    state: AtomicU8,
    failed: AtomicUsize,
}

impl RunStatus {
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn failed_nodes(&self) -> usize {
        self.inner.failed.load(Ordering::Acquire)
    }

    fn set(&self, state: EngineState) {
        self.inner.state.store(state.as_u8(), Ordering::Release);
    }

    fn add_failed(&self) {
        self.inner.failed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Terminal report of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub state: EngineState,
    pub error: Option<Arc<FlowError>>,
    pub elapsed: Duration,
    pub completed: HashSet<String>,
    pub failed: HashSet<String>,
    pub pruned: HashSet<String>,
}

impl RunOutcome {
    pub fn is_finished(&self) -> bool {
        self.state == EngineState::Finish
    }
}

/// Bulk-synchronous scheduler for one run of a [`GraphModel`].
///
/// Each iteration computes the ready set, runs it (inline when it holds a
/// single node, otherwise concurrently on the executor matching each node's
/// kind), waits for the whole wave, then records outcomes and applies branch
/// pruning. The loop stops on the first wave with a failure, on timeout, on
/// completion of every end node, or when nothing is ready (a stall).
///
/// An engine is single-use: build a fresh one per run from the shared graph.
pub struct DagEngine<I> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    graph: Arc<GraphModel<I>>,
    runners: HashMap<String, Arc<NodeRunner<I>>>,
    tracker: StateTracker,
    status: RunStatus,
    error: Option<Arc<FlowError>>,
    executors: Executors,
    collections: CollectionPool,
    hooks: EngineHooks,
    enable_callbacks: bool,
    timeout: Duration,
}

impl<I: Send + Sync + 'static> DagEngine<I> {
    pub fn new(graph: Arc<GraphModel<I>>, executors: Executors, collections: CollectionPool) -> Self {
        let runners = graph
            .node_ids()
            .iter()
            .filter_map(|id| graph.node(id))
            .map(|decl| (decl.id.clone(), Arc::new(NodeRunner::from_decl(decl))))
            .collect();
        let tracker = StateTracker::new(graph.node_ids());
        let timeout = graph.timeout();
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            graph,
            runners,
            tracker,
            status: RunStatus::default(),
            error: None,
            executors,
            collections,
            hooks: EngineHooks::default(),
            enable_callbacks: true,
            timeout,
        }
    }

    pub fn with_hooks(mut self, hooks: EngineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Turn every run-level and node-level hook on or off.
    pub fn with_callbacks(mut self, enabled: bool) -> Self {
        self.enable_callbacks = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> EngineState {
        self.status.state()
    }

    pub fn status(&self) -> RunStatus {
        self.status.clone()
    }

    pub fn error(&self) -> Option<&Arc<FlowError>> {
        self.error.as_ref()
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Drive the run to a terminal state.
    ///
    /// The engine keeps no reference to `input` or `ctx` once this returns.
    pub async fn execute(&mut self, input: &Arc<I>, ctx: &Arc<RunContext>) -> RunOutcome {
        let started = Instant::now();
        self.started_at = Utc::now();
        let workflow = self.graph.workflow().to_string();
        self.status.set(EngineState::Running);
        info!(workflow = %workflow, run_id = %self.run_id, nodes = self.graph.len(), "Run started");

        if let Some(hook) = self.run_hook(HookPhase::Before) {
            if let Err(e) = call_run_hook(&hook) {
                warn!(workflow = %workflow, error = %e, "Before-run hook failed");
                self.fail_run(FlowError::Hook {
                    phase: HookPhase::Before,
                    message: e.to_string(),
                });
                return self.outcome(workflow, started);
            }
        }

        self.run_loop(input, ctx, started).await;

        if let Some(hook) = self.run_hook(HookPhase::After) {
            if let Err(e) = call_run_hook(&hook) {
                warn!(workflow = %workflow, error = %e, "After-run hook failed");
                let message = match self.error.take() {
                    Some(earlier) => format!("{e} (earlier error: {earlier})"),
                    None => e.to_string(),
                };
                self.fail_run(FlowError::Hook {
                    phase: HookPhase::After,
                    message,
                });
            }
        }

        if self.status.state() == EngineState::Running {
            self.status.set(EngineState::Finish);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match self.status.state() {
            EngineState::Finish => {
                info!(workflow = %workflow, run_id = %self.run_id, elapsed_ms, "Run finished");
            }
            state => {
                let error = self.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                warn!(workflow = %workflow, run_id = %self.run_id, %state, elapsed_ms, error = %error, "Run did not finish");
            }
        }
        self.outcome(workflow, started)
    }

    async fn run_loop(&mut self, input: &Arc<I>, ctx: &Arc<RunContext>, started: Instant) {
        while self.status.failed_nodes() == 0 && self.status.state() == EngineState::Running {
            let elapsed = started.elapsed();
            if elapsed > self.timeout {
                warn!(
                    workflow = %self.graph.workflow(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Run timed out"
                );
                self.fail_run(FlowError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                return;
            }

            let collections = self.collections.clone();
            let mut ready = collections.list();
            self.find_ready(&mut ready);

            if ready.is_empty() {
                if self.end_nodes_settled() {
                    debug!(workflow = %self.graph.workflow(), "All end nodes settled");
                } else {
                    let pending = self.tracker.active_nodes();
                    warn!(
                        workflow = %self.graph.workflow(),
                        pending = ?pending,
                        "No ready nodes but end nodes unsettled, run stalled"
                    );
                    self.error = Some(Arc::new(FlowError::Stalled { pending }));
                    self.status.set(EngineState::Stalled);
                }
                return;
            }

            let results = if ready.len() == 1 {
                let id = ready[0].clone();
                let result = self.run_inline(&id, input, ctx).await;
                vec![(id, result)]
            } else {
                self.run_wave(&ready, input, ctx).await
            };
            drop(ready);

            self.record_wave(results, input, ctx);
        }
    }

    /// Active nodes whose dependencies allow them to run.
    fn find_ready(&self, out: &mut Vec<String>) {
        for id in self.graph.node_ids() {
            if self.tracker.is_active(id) && !self.tracker.is_settled(id) && self.is_ready(id) {
                out.push(id.clone());
            }
        }
    }

    fn is_ready(&self, id: &str) -> bool {
        let strong_ok = self.graph.strong_deps(id).map_or(true, |deps| {
            deps.iter()
                .all(|dep| self.tracker.is_pruned(dep) || self.tracker.is_completed(dep))
        });
        if !strong_ok {
            return false;
        }

        match self.graph.weak_deps(id) {
            Some(deps) if !deps.is_empty() => deps
                .iter()
                .filter(|dep| !self.tracker.is_pruned(dep))
                .any(|dep| self.tracker.is_completed(dep)),
            _ => true,
        }
    }

    /// A graph without end nodes never counts as done.
    fn end_nodes_settled(&self) -> bool {
        let ends = self.graph.end_nodes();
        !ends.is_empty()
            && ends
                .iter()
                .all(|id| self.tracker.is_completed(id) || self.tracker.is_skipped(id))
    }

    async fn run_inline(&self, id: &str, input: &Arc<I>, ctx: &Arc<RunContext>) -> NodeResult {
        let Some(runner) = self.runners.get(id) else {
            return missing_runner(id);
        };
        if let Some(hook) = self.node_hook(true) {
            call_node_hook(&hook, runner.id(), runner.kind());
        }
        runner.execute(input.as_ref(), ctx.as_ref()).await
    }

    /// Dispatch every ready node onto its executor and wait for all of them.
    async fn run_wave(
        &self,
        ready: &[String],
        input: &Arc<I>,
        ctx: &Arc<RunContext>,
    ) -> Vec<(String, NodeResult)> {
        let before_node = self.node_hook(true);
        let mut ids = Vec::with_capacity(ready.len());
        let mut handles = Vec::with_capacity(ready.len());

        for id in ready {
            let Some(runner) = self.runners.get(id).cloned() else {
                continue;
            };
            let input = Arc::clone(input);
            let ctx = Arc::clone(ctx);
            let hook = before_node.clone();
            let handle = self.executors.for_kind(runner.kind()).spawn(async move {
                if let Some(hook) = hook {
                    call_node_hook(&hook, runner.id(), runner.kind());
                }
                runner.execute(input.as_ref(), ctx.as_ref()).await
            });
            ids.push(id.clone());
            handles.push(handle);
        }
        debug!(workflow = %self.graph.workflow(), wave = ?ids, "Dispatched wave");

        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        let err = Arc::new(FlowError::NodeExecution {
                            node: id.clone(),
                            message: e.to_string(),
                        });
                        ctx.update_result(&id, |slot| {
                            slot.fail(Arc::clone(&err));
                            slot.clone()
                        })
                    }
                };
                (id, result)
            })
            .collect()
    }

    /// Settle a finished wave.
    ///
    /// Every node of the wave is marked completed or failed first; after-node
    /// hooks and branch pruning follow for the successful ones, so a sibling
    /// that already ran is never pruned.
    fn record_wave(&mut self, results: Vec<(String, NodeResult)>, input: &Arc<I>, ctx: &Arc<RunContext>) {
        let mut succeeded = Vec::with_capacity(results.len());
        for (id, result) in results {
            if result.is_success() {
                if self.tracker.is_completed(&id) {
                    continue;
                }
                self.tracker.mark_completed(&id);
                self.tracker.deactivate(&id);
                debug!(node_id = %id, elapsed_ms = result.duration_ms(), "Node completed");
                succeeded.push(id);
            } else {
                self.tracker.mark_failed(&id);
                self.tracker.deactivate(&id);
                self.status.add_failed();
                let err = result
                    .error
                    .unwrap_or_else(|| Arc::new(FlowError::node(format!("node {id} failed"))));
                warn!(node_id = %id, error = %err, "Node failed");
                if self.error.is_none() {
                    self.error = Some(err);
                }
                self.status.set(EngineState::Error);
            }
        }

        let after_node = self.node_hook(false);
        for id in succeeded {
            let Some(runner) = self.runners.get(&id).cloned() else {
                continue;
            };
            if let Some(ref hook) = after_node {
                call_node_hook(hook, runner.id(), runner.kind());
            }
            if runner.has_chooser() {
                let selected = runner.choose_next(input.as_ref(), ctx.as_ref());
                prune::apply_selection(
                    self.graph.as_ref(),
                    &mut self.tracker,
                    ctx.as_ref(),
                    &id,
                    &selected,
                    &self.collections,
                );
            }
        }
    }

    fn run_hook(&self, phase: HookPhase) -> Option<RunHook> {
        if !self.enable_callbacks {
            return None;
        }
        match phase {
            HookPhase::Before => self.hooks.before.clone(),
            HookPhase::After => self.hooks.after.clone(),
        }
    }

    fn node_hook(&self, before: bool) -> Option<NodeHook> {
        if !self.enable_callbacks {
            return None;
        }
        if before {
            self.hooks.before_node.clone()
        } else {
            self.hooks.after_node.clone()
        }
    }

    fn fail_run(&mut self, error: FlowError) {
        self.error = Some(Arc::new(error));
        self.status.set(EngineState::Error);
    }

    fn outcome(&self, workflow: String, started: Instant) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            workflow,
            started_at: self.started_at,
            state: self.status.state(),
            error: self.error.clone(),
            elapsed: started.elapsed(),
            completed: self.tracker.completed_nodes(),
            failed: self.tracker.failed_nodes(),
            pruned: self.tracker.pruned_nodes(),
        }
    }
}

fn call_run_hook(hook: &RunHook) -> Result<(), FlowError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| hook())) {
        Ok(result) => result,
        Err(_) => Err(FlowError::node("hook panicked")),
    }
}

fn call_node_hook(hook: &NodeHook, id: &str, kind: NodeKind) {
    if std::panic::catch_unwind(AssertUnwindSafe(|| hook(id, kind))).is_err() {
        warn!(node_id = %id, "Node hook panicked");
    }
}

fn missing_runner(id: &str) -> NodeResult {
    let mut result = NodeResult::new();
    result.fail(Arc::new(FlowError::NodeExecution {
        node: id.to_string(),
        message: "no runner for node".into(),
    }));
    result
}
