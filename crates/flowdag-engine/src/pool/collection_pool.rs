use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use flowdag_core::config::{EvictionConfig, PoolSizing};

use super::object_pool::{ObjectPool, PoolSettings, PoolStats, Reusable};

impl Reusable for HashSet<String> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Reusable for Vec<String> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Pools of scratch id sets and id lists used while scheduling.
///
/// Buffers are handed out as guards that go back to the pool on drop.
#[derive(Clone)]
pub struct CollectionPool {
    sets: Arc<ObjectPool<HashSet<String>>>,
    lists: Arc<ObjectPool<Vec<String>>>,
}

impl CollectionPool {
    pub fn new(sizing: PoolSizing, eviction: &EvictionConfig) -> Self {
        let settings = PoolSettings {
            sizing,
            eviction_interval: eviction.eviction_interval(),
            evictable_idle: eviction.evictable_idle(),
            samples_per_run: eviction.samples_per_run,
        };
        Self {
            sets: Arc::new(ObjectPool::new("collection.set", settings, HashSet::new)),
            lists: Arc::new(ObjectPool::new("collection.list", settings, Vec::new)),
        }
    }

    pub fn set(&self) -> PooledSet<'_> {
        PooledSet {
            pool: &self.sets,
            value: self.sets.borrow(),
        }
    }

    pub fn list(&self) -> PooledList<'_> {
        PooledList {
            pool: &self.lists,
            value: self.lists.borrow(),
        }
    }

    /// Idle sets in the queue.
    pub fn set_len(&self) -> usize {
        self.sets.len()
    }

    pub fn list_len(&self) -> usize {
        self.lists.len()
    }

    pub fn set_stats(&self) -> PoolStats {
        self.sets.stats()
    }

    pub fn list_stats(&self) -> PoolStats {
        self.lists.stats()
    }

    pub fn eviction_interval(&self) -> Duration {
        self.sets.eviction_interval()
    }

    pub fn evictable_idle_time(&self) -> Duration {
        self.sets.evictable_idle_time()
    }

    pub fn set_eviction_interval(&self, interval: Duration) {
        self.sets.set_eviction_interval(interval);
        self.lists.set_eviction_interval(interval);
    }

    pub fn set_evictable_idle_time(&self, idle: Duration) {
        self.sets.set_evictable_idle_time(idle);
        self.lists.set_evictable_idle_time(idle);
    }

    pub fn evict_idle(&self) -> usize {
        self.sets.evict_idle() + self.lists.evict_idle()
    }

    pub fn start_evictor(&self) {
        self.sets.start_evictor();
        self.lists.start_evictor();
    }

    pub fn stop_evictor(&self) {
        self.sets.stop_evictor();
        self.lists.stop_evictor();
    }
}

macro_rules! pooled_guard {
    ($name:ident, $ty:ty) => {
        /// Pooled buffer; returned to its pool when dropped.
        pub struct $name<'a> {
            pool: &'a ObjectPool<$ty>,
            value: $ty,
        }

        impl $name<'_> {
            /// Take the buffer out of the pool for good.
            pub fn into_inner(mut self) -> $ty {
                let value = std::mem::take(&mut self.value);
                // Nothing left to release; the emptied buffer holds no allocation.
                std::mem::forget(self);
                value
            }
        }

        impl Deref for $name<'_> {
            type Target = $ty;

            fn deref(&self) -> &$ty {
                &self.value
            }
        }

        impl DerefMut for $name<'_> {
            fn deref_mut(&mut self) -> &mut $ty {
                &mut self.value
            }
        }

        impl Drop for $name<'_> {
            fn drop(&mut self) {
                self.pool.release(std::mem::take(&mut self.value));
            }
        }
    };
}

pooled_guard!(PooledSet, HashSet<String>);
pooled_guard!(PooledList, Vec<String>);

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> CollectionPool {
        CollectionPool::new(
            PoolSizing {
                max_size: 2,
                initial_size: 0,
                min_idle: 0,
            },
            &EvictionConfig::default(),
        )
    }

    #[test]
    fn test_guard_returns_cleared_set() {
        let pool = pool();
        {
            let mut set = pool.set();
            set.insert("a".into());
            set.insert("b".into());
        }
        assert_eq!(pool.set_len(), 1);

        let set = pool.set();
        assert!(set.is_empty());
        assert_eq!(pool.set_stats().created, 1);
    }

    #[test]
    fn test_into_inner_keeps_buffer_out() {
        let pool = pool();
        let mut list = pool.list();
        list.push("x".into());
        let owned = list.into_inner();
        assert_eq!(owned, vec!["x"]);
        assert_eq!(pool.list_len(), 0);
    }

    #[test]
    fn test_full_pool_drops_extra_buffers() {
        let pool = pool();
        let a = pool.set();
        let b = pool.set();
        let c = pool.set();
        drop((a, b, c));
        assert_eq!(pool.set_len(), 2);
        assert_eq!(pool.set_stats().discarded, 1);
    }

    #[test]
    fn test_tunables_apply_to_both_pools() {
        let pool = pool();
        pool.set_evictable_idle_time(Duration::from_millis(200));
        assert_eq!(pool.evictable_idle_time(), Duration::from_secs(1));
        assert_eq!(pool.lists.evictable_idle_time(), Duration::from_secs(1));
    }
}
