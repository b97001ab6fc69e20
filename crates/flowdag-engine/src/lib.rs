pub mod engine;
pub mod executor;
pub mod flow;
pub mod graph;
pub mod pool;
pub mod prune;
pub mod runner;
pub mod state;

pub use engine::{DagEngine, EngineHooks, RunOutcome, RunStatus};
pub use executor::{ExecutorRuntimes, Executors};
pub use flow::{FlowRunner, RunOptions};
pub use graph::{GraphBuilder, GraphModel, NodeDecl, DEFAULT_TIMEOUT};
pub use pool::{CollectionPool, ContextPool, ObjectPool, PoolSettings, PoolStats, Reusable};
pub use runner::NodeRunner;
pub use state::StateTracker;
