pub mod config;
pub mod context;
pub mod error;
pub mod traits;
pub mod types;

pub use config::FlowConfig;
pub use context::RunContext;
pub use error::{FlowError, HookPhase, Result};
pub use traits::{fn_node, Chooser, ExceptionHandler, FnNode, Node, NodeHook, RunHook};
pub use types::*;
