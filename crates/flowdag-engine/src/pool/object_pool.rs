use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowdag_core::config::{PoolSizing, MIN_POOL_TUNABLE_MS};

/// An object that can be cleared and handed out again.
pub trait Reusable: Send + 'static {
    /// Drop all per-use state.
    fn reset(&mut self);

    fn on_borrow(&mut self, at: Instant) {
        let _ = at;
    }

    fn on_return(&mut self, at: Instant) {
        let _ = at;
    }
}

/// Tunables and limits for one [`ObjectPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub sizing: PoolSizing,
    pub eviction_interval: Duration,
    pub evictable_idle: Duration,
    pub samples_per_run: usize,
}

struct Idle<T> {
    value: T,
    since: tokio::time::Instant,
}

/// Counters since the pool was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects allocated because the queue was empty (plus the warm set).
    pub created: usize,
    pub borrowed: usize,
    pub released: usize,
    /// Objects released while the pool was full.
    pub discarded: usize,
    pub evicted: usize,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    borrowed: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
    evicted: AtomicUsize,
}

/// Bounded queue of reusable objects with idle-based background eviction.
///
/// The idle queue is lock-free. `idle_len` reserves a slot before every push,
/// so it never undercounts the queue and `max_size` holds under contention.
pub struct ObjectPool<T: Reusable> {
    name: &'static str,
    idle: SegQueue<Idle<T>>,
    idle_len: AtomicUsize,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    max_size: usize,
    min_idle: usize,
    samples_per_run: usize,
    eviction_interval_ms: AtomicU64,
    evictable_idle_ms: AtomicU64,
    counters: Counters,
    evictor: Mutex<Option<CancellationToken>>,
}

impl<T: Reusable> ObjectPool<T> {
    /// Create the pool and pre-allocate `initial_size` objects.
    ///
    /// Does not start the evictor; see [`ObjectPool::start_evictor`].
    pub fn new(
        name: &'static str,
        settings: PoolSettings,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        let sizing = settings.sizing;
        let warm = sizing.initial_size.min(sizing.max_size);
        let now = tokio::time::Instant::now();
        let queue = SegQueue::new();
        for _ in 0..warm {
            let mut value = factory();
            value.on_return(now.into_std());
            queue.push(Idle { value, since: now });
        }

        let pool = Self {
            name,
            idle: queue,
            idle_len: AtomicUsize::new(warm),
            factory: Box::new(factory),
            max_size: sizing.max_size,
            min_idle: sizing.min_idle,
            samples_per_run: settings.samples_per_run,
            eviction_interval_ms: AtomicU64::new(clamp_ms(
                name,
                "eviction interval",
                settings.eviction_interval.as_millis() as u64,
            )),
            evictable_idle_ms: AtomicU64::new(clamp_ms(
                name,
                "evictable idle time",
                settings.evictable_idle.as_millis() as u64,
            )),
            counters: Counters::default(),
            evictor: Mutex::new(None),
        };
        pool.counters.created.store(warm, Ordering::Relaxed);

        info!(
            pool = name,
            initial = warm,
            max_size = sizing.max_size,
            min_idle = sizing.min_idle,
            "Object pool initialized"
        );
        pool
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take an object from the queue, or allocate one. Always handed out cleared.
    pub fn borrow(&self) -> T {
        let mut value = match self.pop_idle() {
            Some(idle) => idle.value,
            None => {
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        };
        value.reset();
        value.on_borrow(Instant::now());
        self.counters.borrowed.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Return an object. It is cleared and queued, or dropped if the pool is full.
    pub fn release(&self, mut value: T) {
        let now = tokio::time::Instant::now();
        value.on_return(now.into_std());
        value.reset();
        self.counters.released.fetch_add(1, Ordering::Relaxed);

        let reserved = self
            .idle_len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < self.max_size).then_some(len + 1)
            })
            .is_ok();
        if reserved {
            self.idle.push(Idle { value, since: now });
        } else {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn pop_idle(&self) -> Option<Idle<T>> {
        let entry = self.idle.pop()?;
        self.idle_len.fetch_sub(1, Ordering::AcqRel);
        Some(entry)
    }

    /// Objects currently idle in the queue.
    pub fn len(&self) -> usize {
        self.idle_len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            borrowed: self.counters.borrowed.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms.load(Ordering::Relaxed))
    }

    pub fn evictable_idle_time(&self) -> Duration {
        Duration::from_millis(self.evictable_idle_ms.load(Ordering::Relaxed))
    }

    /// Sample up to `samples_per_run` entries from the head of the queue and drop
    /// the ones idle for longer than the threshold. Never shrinks below `min_idle`.
    ///
    /// Each sample is one pop, plus a push back for entries still fresh, so
    /// concurrent borrows and releases proceed during a sweep.
    ///
    /// Returns the number of evicted objects.
    pub fn evict_idle(&self) -> usize {
        let threshold = self.evictable_idle_time();
        let mut evicted = 0;
        for _ in 0..self.samples_per_run {
            if self.len() <= self.min_idle {
                break;
            }
            let Some(entry) = self.pop_idle() else {
                break;
            };
            if entry.since.elapsed() > threshold {
                evicted += 1;
            } else {
                // The slot was ours a moment ago; a racing release may overshoot by one.
                self.idle_len.fetch_add(1, Ordering::AcqRel);
                self.idle.push(entry);
            }
        }

        if evicted > 0 {
            self.counters.evicted.fetch_add(evicted, Ordering::Relaxed);
            debug!(pool = self.name, evicted, "Evicted idle objects");
        }
        evicted
    }

    pub fn set_evictable_idle_time(&self, idle: Duration) {
        let ms = clamp_ms(self.name, "evictable idle time", idle.as_millis() as u64);
        let old = self.evictable_idle_ms.swap(ms, Ordering::Relaxed);
        info!(pool = self.name, old_ms = old, new_ms = ms, "Evictable idle time changed");
    }

    pub fn is_evicting(&self) -> bool {
        self.evictor.lock().is_some()
    }

    /// Stop the background evictor, if running.
    pub fn stop_evictor(&self) {
        if let Some(token) = self.evictor.lock().take() {
            token.cancel();
            debug!(pool = self.name, "Evictor stopped");
        }
    }
}

impl<T: Reusable> ObjectPool<T> {
    /// Spawn the background evictor on the current Tokio runtime.
    ///
    /// A running evictor is replaced. Outside a runtime this logs and does
    /// nothing. The task holds only a weak reference and exits once the pool
    /// is dropped.
    pub fn start_evictor(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(pool = self.name, "No Tokio runtime; idle eviction disabled");
            return;
        };

        let token = CancellationToken::new();
        if let Some(old) = self.evictor.lock().replace(token.clone()) {
            old.cancel();
        }

        let interval = self.eviction_interval();
        info!(
            pool = self.name,
            interval_ms = interval.as_millis() as u64,
            "Evictor started"
        );
        handle.spawn(evict_loop(Arc::downgrade(self), interval, token));
    }

    /// Change the sweep period; a running evictor restarts with the new period.
    pub fn set_eviction_interval(self: &Arc<Self>, interval: Duration) {
        let ms = clamp_ms(self.name, "eviction interval", interval.as_millis() as u64);
        let old = self.eviction_interval_ms.swap(ms, Ordering::Relaxed);
        info!(pool = self.name, old_ms = old, new_ms = ms, "Eviction interval changed");

        if self.is_evicting() {
            self.start_evictor();
        }
    }
}

impl<T: Reusable> Drop for ObjectPool<T> {
    fn drop(&mut self) {
        if let Some(token) = self.evictor.get_mut().take() {
            token.cancel();
        }
    }
}

async fn evict_loop<T: Reusable>(
    pool: Weak<ObjectPool<T>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => break,
        }
        let Some(pool) = pool.upgrade() else {
            break;
        };
        pool.evict_idle();
    }
}

fn clamp_ms(pool: &str, what: &str, ms: u64) -> u64 {
    if ms < MIN_POOL_TUNABLE_MS {
        warn!(
            pool,
            requested_ms = ms,
            minimum_ms = MIN_POOL_TUNABLE_MS,
            "{what} below minimum, clamping"
        );
        MIN_POOL_TUNABLE_MS
    } else {
        ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Buf {
        items: Vec<u32>,
        returned: Option<Instant>,
    }

    impl Reusable for Buf {
        fn reset(&mut self) {
            self.items.clear();
        }

        fn on_return(&mut self, at: Instant) {
            self.returned = Some(at);
        }
    }

    fn settings(max: usize, initial: usize, min_idle: usize) -> PoolSettings {
        PoolSettings {
            sizing: PoolSizing {
                max_size: max,
                initial_size: initial,
                min_idle,
            },
            eviction_interval: Duration::from_secs(30),
            evictable_idle: Duration::from_secs(60),
            samples_per_run: 10,
        }
    }

    #[test]
    fn test_prewarms_initial_size() {
        let pool = ObjectPool::new("test", settings(10, 4, 0), Buf::default);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.stats().created, 4);
    }

    #[test]
    fn test_round_trip_is_cleared() {
        let pool = ObjectPool::new("test", settings(10, 0, 0), Buf::default);
        let mut buf = pool.borrow();
        buf.items.extend([1, 2, 3]);
        pool.release(buf);

        let buf = pool.borrow();
        assert!(buf.items.is_empty());
        assert!(buf.returned.is_some());
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_release_beyond_max_is_dropped() {
        let pool = ObjectPool::new("test", settings(2, 0, 0), Buf::default);
        let a = pool.borrow();
        let b = pool.borrow();
        let c = pool.borrow();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn test_tunables_are_clamped() {
        let pool = Arc::new(ObjectPool::new("test", settings(2, 0, 0), Buf::default));
        pool.set_eviction_interval(Duration::from_millis(10));
        pool.set_evictable_idle_time(Duration::from_millis(999));
        assert_eq!(pool.eviction_interval(), Duration::from_millis(1000));
        assert_eq!(pool.evictable_idle_time(), Duration::from_millis(1000));

        pool.set_evictable_idle_time(Duration::from_secs(5));
        assert_eq!(pool.evictable_idle_time(), Duration::from_secs(5));
    }

    #[test]
    fn test_eviction_keeps_floor_and_samples() {
        let pool = ObjectPool::new("test", settings(100, 30, 5), Buf::default);
        pool.set_evictable_idle_time(Duration::from_millis(1000));
        // Nothing has been idle long enough yet.
        assert_eq!(pool.evict_idle(), 0);
        assert_eq!(pool.len(), 30);

        std::thread::sleep(Duration::from_millis(1100));
        // One sweep samples at most 10 entries.
        assert_eq!(pool.evict_idle(), 10);
        assert_eq!(pool.evict_idle(), 10);
        // Floor of 5 stops the third sweep early.
        assert_eq!(pool.evict_idle(), 5);
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.evict_idle(), 0);
        assert_eq!(pool.stats().evicted, 25);
    }

    #[test]
    fn test_sweep_runs_alongside_borrow_and_release() {
        let mut config = settings(8, 8, 0);
        config.samples_per_run = 1_000;
        let pool = ObjectPool::new("test", config, Buf::default);
        pool.set_evictable_idle_time(Duration::from_secs(3600));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for i in 0..500 {
                        let mut buf = pool.borrow();
                        buf.items.push(i);
                        pool.release(buf);
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..50 {
                    // Everything is fresh, so sampling only rotates the queue.
                    assert_eq!(pool.evict_idle(), 0);
                }
            });
        });

        let stats = pool.stats();
        assert_eq!(stats.borrowed, 2_000);
        assert_eq!(stats.released, 2_000);
        assert_eq!(stats.evicted, 0);
        assert!(pool.len() <= pool.max_size() + 1, "len {}", pool.len());
        assert_eq!(pool.len(), stats.created - stats.discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_evictor_runs_and_restarts() {
        let pool = Arc::new(ObjectPool::new("test", settings(100, 20, 0), Buf::default));
        pool.set_evictable_idle_time(Duration::from_millis(1000));
        pool.start_evictor();
        assert!(pool.is_evicting());

        // First sweep at 30s, everything is older than 1s by then.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(pool.len(), 10);

        pool.set_eviction_interval(Duration::from_secs(2));
        assert!(pool.is_evicting());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(pool.len(), 0);

        pool.stop_evictor();
        assert!(!pool.is_evicting());
    }
}
