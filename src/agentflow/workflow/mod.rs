//! Workflow execution: DAG validation, topological scheduling, per-node
//! dispatch, context propagation, and template resolution.

pub mod context;
pub mod engine;
pub mod template;

pub use context::WorkflowContext;
pub use engine::{AgentRunner, PlatformAgentRunner, WorkflowEngine};
pub use template::{resolve_str, resolve_template, search_path};
