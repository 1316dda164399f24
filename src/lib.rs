// src/lib.rs

// Import the top-level `agentflow` module.
pub mod agentflow;

// Re-exporting key items for easier external access.
pub use agentflow::chat::{AgentProfile, ChatEvent, ChatService};
pub use agentflow::config::PlatformConfig;
pub use agentflow::error::PlatformError;
pub use agentflow::llm::{ChatMessage, ChatRequest, LlmProvider, LlmResponse, MessageRole};
pub use agentflow::workflow::WorkflowEngine;
