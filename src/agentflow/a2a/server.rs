//! A2A server.
//!
//! Executes protocol tasks against local agents by driving the chat
//! service under the A2A system user, recording lifecycle state in the
//! per-agent task store.

use crate::agentflow::a2a::task_store::TaskStoreManager;
use crate::agentflow::a2a::types::{
    task_result_message, A2ATaskContext, A2ATaskStatus, A2A_SYSTEM_USER_ID,
};
use crate::agentflow::chat::ChatService;
use crate::agentflow::models::Agent;
use serde_json::{json, Value};
use std::sync::Arc;

/// Serves A2A tasks for local agents.
pub struct A2AServer {
    chat: Arc<ChatService>,
    stores: Arc<TaskStoreManager>,
}

impl A2AServer {
    pub fn new(chat: Arc<ChatService>, stores: Arc<TaskStoreManager>) -> Self {
        Self { chat, stores }
    }

    /// Execute a task for `agent`, returning the terminal task payload.
    ///
    /// The task is recorded `running` before the chat turn starts and
    /// transitions to `completed` or `failed` with the outcome.  A failure
    /// of the underlying turn is task data, not an `Err`.
    pub async fn execute_task(&self, agent: &Agent, task_id: &str, message: &str) -> Value {
        let store = self.stores.store_for(agent.id).await;

        store
            .save_context(A2ATaskContext::new(task_id, agent.id).with_status(A2ATaskStatus::Running))
            .await;
        store
            .save_task(
                task_id,
                json!({
                    "id": task_id,
                    "status": "running",
                    "agent_id": agent.id,
                }),
            )
            .await;

        match self
            .chat
            .chat(agent, A2A_SYSTEM_USER_ID, message, None)
            .await
        {
            Ok((conversation_id, response)) => {
                store.set_conversation_id(task_id, conversation_id).await;
                store
                    .update_context_status(
                        task_id,
                        A2ATaskStatus::Completed,
                        Some(json!({ "response": response })),
                        None,
                    )
                    .await;

                let task = json!({
                    "id": task_id,
                    "status": "completed",
                    "agent_id": agent.id,
                    "result": task_result_message(&response),
                });
                store.save_task(task_id, task.clone()).await;
                task
            }
            Err(e) => {
                log::error!("task {} execution failed: {}", task_id, e);
                store
                    .update_context_status(
                        task_id,
                        A2ATaskStatus::Failed,
                        None,
                        Some(e.to_string()),
                    )
                    .await;

                let task = json!({
                    "id": task_id,
                    "status": "failed",
                    "agent_id": agent.id,
                    "error": e.to_string(),
                });
                store.save_task(task_id, task.clone()).await;
                task
            }
        }
    }

    /// Fetch a task's current payload.
    pub async fn get_task_status(&self, agent: &Agent, task_id: &str) -> Option<Value> {
        self.stores.store_for(agent.id).await.get_task(task_id).await
    }

    /// Cancel a task.
    ///
    /// A cancel on a task already `completed` or `failed` is a no-op that
    /// returns the terminal record unchanged.  Otherwise the record flips
    /// to `cancelled` immediately; in-flight work is not interrupted and
    /// its eventual result is discarded at the task boundary.
    pub async fn cancel_task(&self, agent: &Agent, task_id: &str) -> Option<Value> {
        let store = self.stores.store_for(agent.id).await;
        let context = store.get_context(task_id).await?;

        if context.status.is_terminal() {
            return store.get_task(task_id).await;
        }

        store
            .update_context_status(task_id, A2ATaskStatus::Cancelled, None, None)
            .await;
        let task = json!({
            "id": task_id,
            "status": "cancelled",
            "agent_id": agent.id,
        });
        store.save_task(task_id, task.clone()).await;
        Some(task)
    }
}
