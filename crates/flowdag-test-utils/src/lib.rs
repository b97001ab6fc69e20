//! Mock node bodies and choosers shared by the flowdag test suites.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;

use flowdag_core::context::RunContext;
use flowdag_core::error::{FlowError, Result};
use flowdag_core::traits::{Chooser, Node};

/// Ordered record of node ids (or lifecycle events) seen during a run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.lock().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }

    /// Position of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Records its node id on execution and optionally returns a fixed value.
pub struct RecordingNode {
    log: ExecutionLog,
    value: Option<Value>,
    delay: Option<Duration>,
}

impl RecordingNode {
    pub fn new(log: ExecutionLog) -> Self {
        Self {
            log,
            value: None,
            delay: None,
        }
    }

    /// A recorder whose log nobody reads.
    pub fn shared<I: Send + Sync + 'static>() -> Arc<dyn Node<I>> {
        Arc::new(Self::new(ExecutionLog::new()))
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Sleep before recording, simulating I/O.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn into_node<I: Send + Sync + 'static>(self) -> Arc<dyn Node<I>> {
        Arc::new(self)
    }
}

impl<I: Send + Sync + 'static> Node<I> for RecordingNode {
    fn execute<'a>(
        &'a self,
        _input: &'a I,
        _ctx: &'a RunContext,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.log.push(node_id);
            Ok(self.value.clone())
        })
    }
}

/// Always fails with a [`FlowError::Node`] carrying `message`.
pub struct FailingNode {
    message: String,
    log: ExecutionLog,
}

impl FailingNode {
    pub fn new(message: impl Into<String>, log: ExecutionLog) -> Self {
        Self {
            message: message.into(),
            log,
        }
    }

    pub fn into_node<I: Send + Sync + 'static>(self) -> Arc<dyn Node<I>> {
        Arc::new(self)
    }
}

impl<I: Send + Sync + 'static> Node<I> for FailingNode {
    fn execute<'a>(
        &'a self,
        _input: &'a I,
        _ctx: &'a RunContext,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            self.log.push(node_id);
            Err(FlowError::node(self.message.clone()))
        })
    }

    fn on_error(&self, _input: &I, _ctx: &RunContext, node_id: &str) {
        self.log.push(format!("{node_id}:on_error"));
    }
}

/// Panics inside `execute`.
pub struct PanickingNode;

impl<I: Send + Sync + 'static> Node<I> for PanickingNode {
    fn execute<'a>(
        &'a self,
        _input: &'a I,
        _ctx: &'a RunContext,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move { blow_up(node_id) })
    }
}

fn blow_up(node_id: &str) -> Result<Option<Value>> {
    panic!("node {node_id} blew up")
}

/// Records every lifecycle callback as `"<id>:<event>"`.
pub struct LifecycleNode {
    log: ExecutionLog,
    fail: bool,
}

impl LifecycleNode {
    pub fn new(log: ExecutionLog, fail: bool) -> Self {
        Self { log, fail }
    }
}

impl<I: Send + Sync + 'static> Node<I> for LifecycleNode {
    fn execute<'a>(
        &'a self,
        _input: &'a I,
        ctx: &'a RunContext,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let current = ctx.current_node().unwrap_or_default();
            self.log.push(format!("{node_id}:execute@{current}"));
            if self.fail {
                Err(FlowError::node("lifecycle failure"))
            } else {
                Ok(Some(Value::from(node_id)))
            }
        })
    }

    fn on_start(&self, _input: &I, _ctx: &RunContext, node_id: &str) {
        self.log.push(format!("{node_id}:on_start"));
    }

    fn on_success(&self, _input: &I, _ctx: &RunContext, node_id: &str) {
        self.log.push(format!("{node_id}:on_success"));
    }

    fn on_error(&self, _input: &I, _ctx: &RunContext, node_id: &str) {
        self.log.push(format!("{node_id}:on_error"));
    }
}

/// Tracks how many executions overlap in time.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// A node that enters the probe, sleeps for `hold`, then leaves.
    pub fn node<I: Send + Sync + 'static>(self: &Arc<Self>, hold: Duration) -> Arc<dyn Node<I>> {
        Arc::new(ProbeNode {
            probe: Arc::clone(self),
            hold,
        })
    }
}

struct ProbeNode {
    probe: Arc<ConcurrencyProbe>,
    hold: Duration,
}

impl<I: Send + Sync + 'static> Node<I> for ProbeNode {
    fn execute<'a>(
        &'a self,
        _input: &'a I,
        _ctx: &'a RunContext,
        _node_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        })
    }
}

/// Chooser that always selects the same ids.
pub struct FixedChooser {
    selected: HashSet<String>,
}

impl FixedChooser {
    pub fn new<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        Self {
            selected: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl<I: Send + Sync + 'static> Chooser<I> for FixedChooser {
    fn choose_next(&self, _input: &I, _ctx: &RunContext) -> HashSet<String> {
        self.selected.clone()
    }
}

/// Shorthand for an `Arc`'d [`FixedChooser`].
pub fn choose<I: Send + Sync + 'static, S: Into<String>>(
    ids: impl IntoIterator<Item = S>,
) -> Arc<dyn Chooser<I>> {
    Arc::new(FixedChooser::new(ids))
}

/// Chooser that picks the successor named by a string key in the context data.
pub struct ContextKeyChooser {
    key: String,
}

impl ContextKeyChooser {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl<I: Send + Sync + 'static> Chooser<I> for ContextKeyChooser {
    fn choose_next(&self, _input: &I, ctx: &RunContext) -> HashSet<String> {
        ctx.get_str(&self.key).into_iter().collect()
    }
}
