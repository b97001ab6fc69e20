//! Reuse of run contexts and scratch collections across runs.

pub mod collection_pool;
pub mod context_pool;
pub mod object_pool;

pub use collection_pool::{CollectionPool, PooledList, PooledSet};
pub use context_pool::ContextPool;
pub use object_pool::{ObjectPool, PoolSettings, PoolStats, Reusable};
