use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use flowdag_core::config::{EvictionConfig, PoolSizing};
use flowdag_core::context::RunContext;

use super::object_pool::{ObjectPool, PoolSettings, PoolStats, Reusable};

// Pooled contexts are always uniquely owned, so `get_mut` only misses for
// a context that is about to be refused on release.
impl Reusable for Arc<RunContext> {
    fn reset(&mut self) {
        self.clear();
    }

    fn on_borrow(&mut self, at: Instant) {
        if let Some(ctx) = Arc::get_mut(self) {
            ctx.mark_borrowed(at);
        }
    }

    fn on_return(&mut self, at: Instant) {
        if let Some(ctx) = Arc::get_mut(self) {
            ctx.mark_returned(at);
        }
    }
}

/// Shared pool of [`RunContext`]s, one borrowed per run.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct ContextPool {
    inner: Arc<ObjectPool<Arc<RunContext>>>,
}

impl ContextPool {
    pub fn new(sizing: PoolSizing, eviction: &EvictionConfig) -> Self {
        let settings = PoolSettings {
            sizing,
            eviction_interval: eviction.eviction_interval(),
            evictable_idle: eviction.evictable_idle(),
            samples_per_run: eviction.samples_per_run,
        };
        Self {
            inner: Arc::new(ObjectPool::new("context", settings, || Arc::new(RunContext::new()))),
        }
    }

    /// A cleared context, ready for a new run. The `Arc` itself is pooled.
    pub fn borrow(&self) -> Arc<RunContext> {
        self.inner.borrow()
    }

    /// Hand a context back after a run.
    ///
    /// A context still referenced elsewhere (for example by a node task that
    /// outlived its run) is not pooled; it is dropped once the last reference goes.
    pub fn release(&self, mut ctx: Arc<RunContext>) {
        if Arc::get_mut(&mut ctx).is_some() {
            self.inner.release(ctx);
        } else {
            warn!(
                references = Arc::strong_count(&ctx),
                "Run context still shared on release, not pooling it"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    pub fn eviction_interval(&self) -> Duration {
        self.inner.eviction_interval()
    }

    pub fn evictable_idle_time(&self) -> Duration {
        self.inner.evictable_idle_time()
    }

    pub fn set_eviction_interval(&self, interval: Duration) {
        self.inner.set_eviction_interval(interval);
    }

    pub fn set_evictable_idle_time(&self, idle: Duration) {
        self.inner.set_evictable_idle_time(idle);
    }

    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle()
    }

    pub fn start_evictor(&self) {
        self.inner.start_evictor();
    }

    pub fn stop_evictor(&self) {
        self.inner.stop_evictor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdag_core::types::NodeResult;

    fn pool() -> ContextPool {
        ContextPool::new(
            PoolSizing {
                max_size: 4,
                initial_size: 1,
                min_idle: 0,
            },
            &EvictionConfig::default(),
        )
    }

    #[test]
    fn test_borrow_release_borrow_is_clean() {
        let pool = pool();
        let ctx = pool.borrow();
        ctx.put_result("a", NodeResult::with_value(serde_json::json!(1)));
        ctx.set_str("user", "alice");
        ctx.set_current_node(Some("a"));
        pool.release(ctx);
        assert_eq!(pool.len(), 1);

        let ctx = pool.borrow();
        assert!(ctx.is_empty());
        assert!(ctx.current_node().is_none());
        assert!(ctx.returned_at().is_some());
        assert!(ctx.borrowed_at().is_some());
        assert_eq!(ctx.idle_time(), Duration::ZERO);
    }

    #[test]
    fn test_same_allocation_is_reused() {
        let pool = pool();
        let ctx = pool.borrow();
        let first = Arc::as_ptr(&ctx);
        pool.release(ctx);

        let again = pool.borrow();
        assert_eq!(Arc::as_ptr(&again), first);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_shared_context_is_not_pooled() {
        let pool = pool();
        let before = pool.len();
        let ctx = pool.borrow();
        let leaked = Arc::clone(&ctx);
        pool.release(ctx);
        assert_eq!(pool.len(), before - 1);
        drop(leaked);
    }

    #[test]
    fn test_defaults_follow_eviction_config() {
        let pool = pool();
        assert_eq!(pool.eviction_interval(), Duration::from_secs(30));
        assert_eq!(pool.evictable_idle_time(), Duration::from_secs(60));
    }
}
