//! Storage seam.
//!
//! The engine, the chat loop, and the HTTP plane depend on the narrow
//! repository traits in this module, never on a concrete database.
//! [`MemoryStore`] implements every trait over `tokio::sync::RwLock`ed maps
//! and is what the binary and the test suite wire in; a SQL-backed
//! implementation slots in behind the same traits.
//!
//! Tenancy rule: owner-scoped lookups return `None` when the entity belongs
//! to a different user.  Callers translate that to `NotFound` — never
//! `Forbidden` — so existence cannot be probed across tenants.

use crate::agentflow::error::PlatformError;
use crate::agentflow::models::{
    Agent, ApiKey, Conversation, ScheduleTrigger, StoredMessage, WebhookTrigger, Workflow,
    WorkflowExecution,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Lookup of agents, globally or scoped to an owner.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Agent>, PlatformError>;
    async fn get_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Option<Agent>, PlatformError>;
}

/// Lookup of workflows, globally or scoped to an owner.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, PlatformError>;
    async fn get_for_user(&self, id: Uuid, user_id: Uuid)
        -> Result<Option<Workflow>, PlatformError>;
}

/// Persistence of workflow execution records.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn insert(&self, execution: &WorkflowExecution) -> Result<(), PlatformError>;
    async fn update(&self, execution: &WorkflowExecution) -> Result<(), PlatformError>;
    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, PlatformError>;
}

/// Conversation records.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: &Conversation) -> Result<(), PlatformError>;
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>, PlatformError>;
}

/// Message records.  `list_by_conversation` returns messages in creation
/// order — the order the chat loop appended them.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: &StoredMessage) -> Result<(), PlatformError>;
    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredMessage>, PlatformError>;
}

/// Cron trigger records for the scheduler.
#[async_trait]
pub trait ScheduleTriggerRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<ScheduleTrigger>, PlatformError>;
    async fn get(&self, id: Uuid) -> Result<Option<ScheduleTrigger>, PlatformError>;
    /// Record a fire: sets `last_run_at` and the pre-computed `next_run_at`.
    async fn record_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError>;
}

/// Webhook trigger records for the dispatcher.
#[async_trait]
pub trait WebhookTriggerRepository: Send + Sync {
    async fn find_active_by_path(
        &self,
        path: &str,
    ) -> Result<Option<WebhookTrigger>, PlatformError>;
    async fn touch_last_triggered(&self, id: Uuid, at: DateTime<Utc>)
        -> Result<(), PlatformError>;
}

/// API key records, addressed by SHA-256 hash.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn insert(&self, key: &ApiKey) -> Result<(), PlatformError>;
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, PlatformError>;
    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PlatformError>;
}

/// In-memory implementation of every repository trait.
///
/// Each map is guarded independently; operations never hold more than one
/// lock at a time.
#[derive(Default)]
pub struct MemoryStore {
    agents: RwLock<HashMap<Uuid, Agent>>,
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    executions: RwLock<HashMap<Uuid, WorkflowExecution>>,
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    messages: RwLock<HashMap<Uuid, Vec<StoredMessage>>>,
    schedule_triggers: RwLock<HashMap<Uuid, ScheduleTrigger>>,
    webhook_triggers: RwLock<HashMap<Uuid, WebhookTrigger>>,
    api_keys: RwLock<HashMap<Uuid, ApiKey>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an agent (used by wiring and tests).
    pub async fn insert_agent(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id, agent);
    }

    /// Seed a workflow.
    pub async fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }

    /// Seed a schedule trigger.
    pub async fn insert_schedule_trigger(&self, trigger: ScheduleTrigger) {
        self.schedule_triggers
            .write()
            .await
            .insert(trigger.id, trigger);
    }

    /// Register a webhook trigger.  Duplicate paths among active triggers
    /// are a conflict.
    pub async fn insert_webhook_trigger(
        &self,
        trigger: WebhookTrigger,
    ) -> Result<(), PlatformError> {
        let mut triggers = self.webhook_triggers.write().await;
        let duplicate = triggers
            .values()
            .any(|t| t.is_active && trigger.is_active && t.webhook_path == trigger.webhook_path);
        if duplicate {
            return Err(PlatformError::Conflict(format!(
                "Webhook path already registered: {}",
                trigger.webhook_path
            )));
        }
        triggers.insert(trigger.id, trigger);
        Ok(())
    }
}

#[async_trait]
impl AgentRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Agent>, PlatformError> {
        Ok(self.agents.read().await.get(&id).cloned())
    }

    async fn get_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Option<Agent>, PlatformError> {
        Ok(self
            .agents
            .read()
            .await
            .get(&id)
            .filter(|a| a.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl WorkflowRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, PlatformError> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn get_for_user(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Workflow>, PlatformError> {
        Ok(self
            .workflows
            .read()
            .await
            .get(&id)
            .filter(|w| w.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl ExecutionRepository for MemoryStore {
    async fn insert(&self, execution: &WorkflowExecution) -> Result<(), PlatformError> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), PlatformError> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, PlatformError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn create(&self, conversation: &Conversation) -> Result<(), PlatformError> {
        self.conversations
            .write()
            .await
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>, PlatformError> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(&self, message: &StoredMessage) -> Result<(), PlatformError> {
        self.messages
            .write()
            .await
            .entry(message.conversation_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredMessage>, PlatformError> {
        Ok(self
            .messages
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ScheduleTriggerRepository for MemoryStore {
    async fn list_active(&self) -> Result<Vec<ScheduleTrigger>, PlatformError> {
        Ok(self
            .schedule_triggers
            .read()
            .await
            .values()
            .filter(|t| t.is_active)
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduleTrigger>, PlatformError> {
        Ok(self.schedule_triggers.read().await.get(&id).cloned())
    }

    async fn record_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError> {
        if let Some(trigger) = self.schedule_triggers.write().await.get_mut(&id) {
            trigger.last_run_at = Some(last_run_at);
            trigger.next_run_at = next_run_at;
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookTriggerRepository for MemoryStore {
    async fn find_active_by_path(
        &self,
        path: &str,
    ) -> Result<Option<WebhookTrigger>, PlatformError> {
        Ok(self
            .webhook_triggers
            .read()
            .await
            .values()
            .find(|t| t.is_active && t.webhook_path == path)
            .cloned())
    }

    async fn touch_last_triggered(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        if let Some(trigger) = self.webhook_triggers.write().await.get_mut(&id) {
            trigger.last_triggered_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl ApiKeyRepository for MemoryStore {
    async fn insert(&self, key: &ApiKey) -> Result<(), PlatformError> {
        self.api_keys.write().await.insert(key.id, key.clone());
        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, PlatformError> {
        Ok(self
            .api_keys
            .read()
            .await
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PlatformError> {
        if let Some(key) = self.api_keys.write().await.get_mut(&id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}
