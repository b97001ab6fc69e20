//! Graph model and validation.
//!
//! Node declarations are assembled by the caller, validated once by
//! [`GraphBuilder`], and frozen into a [`GraphModel`] shared by every run of
//! the workflow.

pub mod builder;
pub mod cycle;
pub mod model;

pub use builder::{GraphBuilder, DEFAULT_TIMEOUT};
pub use model::{GraphModel, NodeDecl};
