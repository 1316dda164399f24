//! A2A task storage.
//!
//! Task lifecycle state lives in memory, sharded per agent.  Each
//! [`TaskStore`] guards its task and context maps under a single mutex, so
//! operations within one agent are serialised while different agents never
//! contend.  The [`TaskStoreManager`] owns the per-agent directory behind
//! its own mutex: the first access for an agent creates and publishes its
//! store exactly once.
//!
//! A production deployment MAY swap the store for a shared backing store
//! preserving the same interface; the workflow engine and A2A server treat
//! it as opaque.
//!
//! Retention: terminal records past a per-store capacity are evicted
//! oldest-first, bounding memory without touching live tasks.

use crate::agentflow::a2a::types::{A2ATaskContext, A2ATaskStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Terminal records kept per agent before oldest-first eviction.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Default)]
struct TaskStoreInner {
    tasks: HashMap<String, Value>,
    contexts: HashMap<String, A2ATaskContext>,
    /// Task ids in first-save order, for bounded eviction.
    order: Vec<String>,
}

impl TaskStoreInner {
    fn evict_terminal_overflow(&mut self, capacity: usize) {
        if self.order.len() <= capacity {
            return;
        }
        let excess = self.order.len() - capacity;
        let mut evicted = 0;
        self.order.retain(|task_id| {
            if evicted >= excess {
                return true;
            }
            let terminal = self
                .contexts
                .get(task_id)
                .map(|ctx| ctx.status.is_terminal() || ctx.status == A2ATaskStatus::Cancelled)
                .unwrap_or(true);
            if terminal {
                evicted += 1;
                return false;
            }
            true
        });
        // retain dropped ids from order; drop their records too
        let live: std::collections::HashSet<&String> = self.order.iter().collect();
        self.tasks.retain(|id, _| live.contains(id));
        self.contexts.retain(|id, _| live.contains(id));
    }
}

/// In-memory task store for one agent.
pub struct TaskStore {
    inner: Mutex<TaskStoreInner>,
    capacity: usize,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TaskStoreInner::default()),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Fetch a task payload by id.
    pub async fn get_task(&self, task_id: &str) -> Option<Value> {
        self.inner.lock().await.tasks.get(task_id).cloned()
    }

    /// Save or update a task payload.
    pub async fn save_task(&self, task_id: &str, task_data: Value) {
        let mut inner = self.inner.lock().await;
        if !inner.tasks.contains_key(task_id) && !inner.order.iter().any(|id| id == task_id) {
            inner.order.push(task_id.to_string());
        }
        inner.tasks.insert(task_id.to_string(), task_data);
        let capacity = self.capacity;
        inner.evict_terminal_overflow(capacity);
    }

    /// Delete a task and its context.
    pub async fn delete_task(&self, task_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.tasks.remove(task_id);
        inner.contexts.remove(task_id);
        inner.order.retain(|id| id != task_id);
    }

    /// Fetch a task context by id.
    pub async fn get_context(&self, task_id: &str) -> Option<A2ATaskContext> {
        self.inner.lock().await.contexts.get(task_id).cloned()
    }

    /// Save a task context.
    pub async fn save_context(&self, context: A2ATaskContext) {
        let mut inner = self.inner.lock().await;
        let task_id = context.task_id.clone();
        if !inner.tasks.contains_key(&task_id) && !inner.order.iter().any(|id| id == &task_id) {
            inner.order.push(task_id.clone());
        }
        inner.contexts.insert(task_id, context);
    }

    /// Update a context's status, optionally attaching a result or error.
    /// Returns the updated context, or `None` for unknown tasks.
    pub async fn update_context_status(
        &self,
        task_id: &str,
        status: A2ATaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Option<A2ATaskContext> {
        let mut inner = self.inner.lock().await;
        let context = inner.contexts.get_mut(task_id)?;
        context.status = status;
        if let Some(result) = result {
            context.result = Some(result);
        }
        if let Some(error) = error {
            context.error = Some(error);
        }
        Some(context.clone())
    }

    /// Attach the internal conversation id to a task.
    pub async fn set_conversation_id(
        &self,
        task_id: &str,
        conversation_id: Uuid,
    ) -> Option<A2ATaskContext> {
        let mut inner = self.inner.lock().await;
        let context = inner.contexts.get_mut(task_id)?;
        context.conversation_id = Some(conversation_id);
        Some(context.clone())
    }

    /// All contexts belonging to `agent_id`.
    pub async fn list_tasks_by_agent(&self, agent_id: Uuid) -> Vec<A2ATaskContext> {
        self.inner
            .lock()
            .await
            .contexts
            .values()
            .filter(|ctx| ctx.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Drop every task and context.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.tasks.clear();
        inner.contexts.clear();
        inner.order.clear();
    }
}

/// Directory of per-agent task stores.
///
/// Constructed once at startup and injected wherever task state is needed.
/// The directory mutex only guards store creation; task operations go
/// through each store's own mutex.
#[derive(Default)]
pub struct TaskStoreManager {
    stores: Mutex<HashMap<Uuid, Arc<TaskStore>>>,
}

impl TaskStoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the store for an agent, creating it on first access.
    pub async fn store_for(&self, agent_id: Uuid) -> Arc<TaskStore> {
        let mut stores = self.stores.lock().await;
        Arc::clone(
            stores
                .entry(agent_id)
                .or_insert_with(|| Arc::new(TaskStore::new())),
        )
    }

    /// Clear every store (test support).
    pub async fn clear_all(&self) {
        let mut stores = self.stores.lock().await;
        for store in stores.values() {
            store.clear().await;
        }
        stores.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_get_task() {
        let store = TaskStore::new();
        store
            .save_task("t1", json!({"id": "t1", "status": "running"}))
            .await;
        assert_eq!(store.get_task("t1").await.unwrap()["status"], "running");
        assert!(store.get_task("t2").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_task_and_context() {
        let store = TaskStore::new();
        let agent = Uuid::new_v4();
        store.save_task("t1", json!({"id": "t1"})).await;
        store.save_context(A2ATaskContext::new("t1", agent)).await;

        store.delete_task("t1").await;
        assert!(store.get_task("t1").await.is_none());
        assert!(store.get_context("t1").await.is_none());
    }

    #[tokio::test]
    async fn test_update_context_status() {
        let store = TaskStore::new();
        let agent = Uuid::new_v4();
        store.save_context(A2ATaskContext::new("t1", agent)).await;

        let updated = store
            .update_context_status(
                "t1",
                A2ATaskStatus::Completed,
                Some(json!({"response": "ok"})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(updated.status, A2ATaskStatus::Completed);
        assert_eq!(updated.result.unwrap()["response"], "ok");

        assert!(store
            .update_context_status("missing", A2ATaskStatus::Failed, None, None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_set_conversation_id() {
        let store = TaskStore::new();
        let agent = Uuid::new_v4();
        let conv = Uuid::new_v4();
        store.save_context(A2ATaskContext::new("t1", agent)).await;

        let updated = store.set_conversation_id("t1", conv).await.unwrap();
        assert_eq!(updated.conversation_id, Some(conv));
    }

    #[tokio::test]
    async fn test_list_tasks_by_agent() {
        let store = TaskStore::new();
        let agent = Uuid::new_v4();
        store.save_context(A2ATaskContext::new("t1", agent)).await;
        store.save_context(A2ATaskContext::new("t2", agent)).await;
        store
            .save_context(A2ATaskContext::new("t3", Uuid::new_v4()))
            .await;

        assert_eq!(store.list_tasks_by_agent(agent).await.len(), 2);
    }

    #[tokio::test]
    async fn test_manager_creates_store_once() {
        let manager = TaskStoreManager::new();
        let agent = Uuid::new_v4();
        let a = manager.store_for(agent).await;
        let b = manager.store_for(agent).await;
        assert!(Arc::ptr_eq(&a, &b));

        let other = manager.store_for(Uuid::new_v4()).await;
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
