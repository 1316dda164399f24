//! Platform server binary.
//!
//! Wires the in-memory store, the builtin tool registry, the LLM provider,
//! the chat service, the workflow engine, the worker pool, the scheduler,
//! and the HTTP surface, then serves until interrupted.

use agentflow::agentflow::a2a::client::A2AClient;
use agentflow::agentflow::a2a::server::A2AServer;
use agentflow::agentflow::a2a::task_store::TaskStoreManager;
use agentflow::agentflow::chat::ChatService;
use agentflow::agentflow::config::PlatformConfig;
use agentflow::agentflow::credentials::CredentialStore;
use agentflow::agentflow::llm::OpenAiProvider;
use agentflow::agentflow::queue::{QueueOptions, TaskQueue};
use agentflow::agentflow::rate_limiter::{MemorySlidingWindowStore, RateLimiter};
use agentflow::agentflow::repository::MemoryStore;
use agentflow::agentflow::scheduler::Scheduler;
use agentflow::agentflow::server::{serve, AppState};
use agentflow::agentflow::tools::{
    CalculatorTool, CodeExecutionTool, InvokeAgentTool, MockSearchProvider, ToolRegistry,
    WebSearchTool,
};
use agentflow::agentflow::workflow::engine::{PlatformAgentRunner, WorkflowEngine};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config = PlatformConfig::from_env();

    let store = Arc::new(MemoryStore::new());
    let a2a_client = Arc::new(A2AClient::new());

    // Builtin tools; the registry is frozen once shared.
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WebSearchTool::new(Arc::new(MockSearchProvider))));
    registry.register(Arc::new(CodeExecutionTool::new()));
    registry.register(Arc::new(CalculatorTool::new()));
    registry.register(Arc::new(InvokeAgentTool::new(Arc::clone(&a2a_client))));
    let registry = Arc::new(registry);

    let provider = Arc::new(OpenAiProvider::new(
        std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| String::from("https://api.openai.com/v1")),
        std::env::var("OPENAI_API_KEY").unwrap_or_default(),
    ));

    let chat = Arc::new(
        ChatService::new(
            provider,
            store.clone(),
            store.clone(),
            Arc::clone(&registry),
        )
        .with_limits(config.max_tool_iterations, config.max_tool_calls_per_turn)
        .with_tool_timeout(config.default_tool_timeout),
    );

    let task_stores = Arc::new(TaskStoreManager::new());
    let a2a_server = Arc::new(A2AServer::new(Arc::clone(&chat), Arc::clone(&task_stores)));

    let agent_runner = Arc::new(PlatformAgentRunner::new(
        Arc::clone(&chat),
        store.clone(),
        Arc::clone(&a2a_client),
    ));
    let engine = Arc::new(
        WorkflowEngine::new(store.clone(), Arc::clone(&registry)).with_agent_runner(agent_runner),
    );

    let queue = TaskQueue::start(
        store.clone(),
        engine,
        QueueOptions {
            workers: config.worker_count,
            task_time_limit: config.task_time_limit,
            ..QueueOptions::default()
        },
    );

    let scheduler = Arc::new(Scheduler::new(store.clone(), Arc::clone(&queue)));
    scheduler.spawn();

    let state = Arc::new(AppState {
        agents: store.clone(),
        workflows: store.clone(),
        webhooks: store.clone(),
        credentials: Arc::new(CredentialStore::new(store.clone())),
        rate_limiter: Arc::new(RateLimiter::new(Arc::new(MemorySlidingWindowStore::new()))),
        queue,
        a2a: a2a_server,
        config: config.clone(),
    });

    let (_, handle) = serve(state, &config.bind_addr).await?;
    handle.await?;
    Ok(())
}
