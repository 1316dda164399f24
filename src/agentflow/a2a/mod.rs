//! Agent-to-Agent (A2A) protocol plane.
//!
//! Agents discover each other through an agent card and exchange tasks
//! over HTTP+JSON.  The task store keeps per-agent task lifecycles in
//! memory; the server executes tasks through the chat service; the client
//! talks to remote agents.

pub mod card;
pub mod client;
pub mod server;
pub mod task_store;
pub mod types;

pub use client::A2AClient;
pub use server::A2AServer;
pub use task_store::{TaskStore, TaskStoreManager};
pub use types::{A2ATaskContext, A2ATaskStatus};
