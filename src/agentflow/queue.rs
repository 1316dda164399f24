//! Task queue and worker pool.
//!
//! Triggers enqueue jobs — "execute workflow W with trigger payload P" —
//! and a pool of worker tasks drains them.  Each worker runs one job at a
//! time under a wall-clock limit; failed jobs are retried a bounded number
//! of times and then dead-lettered.  Acknowledgement is late: a job counts
//! as done only after the engine has persisted the execution record, so a
//! worker lost mid-job leads to redelivery, not loss.
//!
//! Job handles are opaque ids that callers can poll via
//! [`TaskQueue::status`].

use crate::agentflow::error::PlatformError;
use crate::agentflow::repository::WorkflowRepository;
use crate::agentflow::workflow::engine::WorkflowEngine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

/// Default bound on delivery attempts per job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default wall-clock limit per job.
pub const DEFAULT_TASK_TIME_LIMIT: Duration = Duration::from_secs(300);

/// What caused a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Api,
    Webhook,
    Schedule,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Api => "api",
            TriggerType::Webhook => "webhook",
            TriggerType::Schedule => "schedule",
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub trigger_data: Value,
}

/// Opaque handle returned at enqueue time, surfaceable to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: Uuid,
}

/// Observable job states.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Completed { execution_id: Uuid },
    DeadLettered { error: String },
}

#[derive(Debug)]
struct QueuedJob {
    id: Uuid,
    payload: JobPayload,
    attempt: u32,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub workers: usize,
    pub max_retries: u32,
    pub task_time_limit: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            max_retries: DEFAULT_MAX_RETRIES,
            task_time_limit: DEFAULT_TASK_TIME_LIMIT,
        }
    }
}

/// The work queue.  Construction spawns the worker pool; workers live for
/// the lifetime of the owning runtime.
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    states: Arc<RwLock<HashMap<Uuid, JobState>>>,
}

impl TaskQueue {
    /// Start the queue with `options.workers` worker tasks.
    pub fn start(
        workflows: Arc<dyn WorkflowRepository>,
        engine: Arc<WorkflowEngine>,
        options: QueueOptions,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<QueuedJob>();
        let rx = Arc::new(Mutex::new(rx));
        let states: Arc<RwLock<HashMap<Uuid, JobState>>> = Arc::new(RwLock::new(HashMap::new()));

        for worker_index in 0..options.workers.max(1) {
            let rx = Arc::clone(&rx);
            let tx = tx.clone();
            let states = Arc::clone(&states);
            let workflows = Arc::clone(&workflows);
            let engine = Arc::clone(&engine);
            let options = options.clone();

            tokio::spawn(async move {
                loop {
                    // Hold the receiver lock only while waiting for a job,
                    // so other workers can take the next one immediately.
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(mut job) = job else {
                        break;
                    };

                    states.write().await.insert(job.id, JobState::Running);
                    log::info!(
                        "worker {} picked up job {} (attempt {})",
                        worker_index,
                        job.id,
                        job.attempt + 1
                    );

                    let outcome = tokio::time::timeout(
                        options.task_time_limit,
                        run_job(&workflows, &engine, &job.payload),
                    )
                    .await;

                    let error = match outcome {
                        Ok(Ok(execution_id)) => {
                            states
                                .write()
                                .await
                                .insert(job.id, JobState::Completed { execution_id });
                            continue;
                        }
                        Ok(Err(e)) => e.to_string(),
                        Err(_) => format!(
                            "Job exceeded time limit of {}s",
                            options.task_time_limit.as_secs()
                        ),
                    };

                    job.attempt += 1;
                    if job.attempt < options.max_retries {
                        log::warn!(
                            "job {} failed (attempt {}/{}): {} — requeueing",
                            job.id,
                            job.attempt,
                            options.max_retries,
                            error
                        );
                        states.write().await.insert(job.id, JobState::Queued);
                        if tx.send(job).is_err() {
                            break;
                        }
                    } else {
                        log::error!(
                            "job {} exhausted {} attempts: {} — dead-lettered",
                            job.id,
                            options.max_retries,
                            error
                        );
                        states
                            .write()
                            .await
                            .insert(job.id, JobState::DeadLettered { error });
                    }
                }
            });
        }

        Arc::new(Self { tx, states })
    }

    /// Accept a job into the queue.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<TaskHandle, PlatformError> {
        let id = Uuid::new_v4();
        self.states.write().await.insert(id, JobState::Queued);
        self.tx
            .send(QueuedJob {
                id,
                payload,
                attempt: 0,
            })
            .map_err(|_| PlatformError::Internal(String::from("task queue is closed")))?;
        Ok(TaskHandle { id })
    }

    /// Poll a job's state by handle id.
    pub async fn status(&self, id: Uuid) -> Option<JobState> {
        self.states.read().await.get(&id).cloned()
    }
}

/// Execute one job: load the workflow, run the engine, persist.
///
/// A workflow execution that *fails* is still a successful job — the
/// failure lives in the execution record.  Job-level errors (workflow
/// missing, persistence faults) trigger the retry path.
async fn run_job(
    workflows: &Arc<dyn WorkflowRepository>,
    engine: &Arc<WorkflowEngine>,
    payload: &JobPayload,
) -> Result<Uuid, PlatformError> {
    let workflow = workflows
        .get(payload.workflow_id)
        .await?
        .ok_or_else(|| {
            PlatformError::NotFound(format!("Workflow not found: {}", payload.workflow_id))
        })?;

    let mut trigger_data = Map::new();
    trigger_data.insert(
        String::from("trigger_type"),
        json!(payload.trigger_type.as_str()),
    );
    if let Value::Object(extra) = &payload.trigger_data {
        for (key, value) in extra {
            trigger_data.insert(key.clone(), value.clone());
        }
    }

    let execution = engine
        .execute(&workflow, Some(Value::Object(trigger_data)))
        .await?;
    log::info!(
        "job for workflow {} finished: execution {} is {:?}",
        payload.workflow_id,
        execution.id,
        execution.status
    );
    Ok(execution.id)
}
