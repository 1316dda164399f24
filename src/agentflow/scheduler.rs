//! Cron scheduler.
//!
//! A periodic reconciler reads the active schedule triggers, keeps an
//! in-process map of `trigger_id → (schedule, next_fire)`, and enqueues a
//! job for every trigger whose fire time has arrived.  Invalid cron
//! expressions are skipped silently; a trigger fires at most once per
//! reconcile tick, with older missed fires discarded.
//!
//! Cron expressions are 5-field POSIX (minute, hour, day-of-month, month,
//! day-of-week) interpreted in the trigger's declared timezone; all stored
//! instants are UTC.

use crate::agentflow::error::PlatformError;
use crate::agentflow::queue::{JobPayload, TaskQueue, TriggerType};
use crate::agentflow::repository::ScheduleTriggerRepository;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default reconcile interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Parse a 5-field POSIX cron expression.
///
/// The `cron` crate wants a seconds field, so a zero-seconds field is
/// prefixed before parsing.  Anything other than exactly five fields is
/// invalid.
pub fn parse_cron(expression: &str) -> Result<Schedule, PlatformError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(PlatformError::InvalidInput(format!(
            "Invalid cron expression: {}",
            expression
        )));
    }
    Schedule::from_str(&format!("0 {}", fields.join(" "))).map_err(|e| {
        PlatformError::InvalidInput(format!("Invalid cron expression: {}: {}", expression, e))
    })
}

/// Whether a cron expression is valid 5-field POSIX.
pub fn validate_cron_expression(expression: &str) -> bool {
    parse_cron(expression).is_ok()
}

/// Compute the next fire time strictly after `after`, evaluated in `tz`
/// and returned in UTC.
pub fn next_fire_time(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|_| {
        log::debug!("unknown timezone '{}', falling back to UTC", name);
        chrono_tz::UTC
    })
}

struct ScheduleEntry {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
    next_fire: DateTime<Utc>,
}

/// Periodic reconciler between trigger storage and the in-process
/// schedule.
pub struct Scheduler {
    triggers: Arc<dyn ScheduleTriggerRepository>,
    queue: Arc<TaskQueue>,
    interval: Duration,
    entries: Mutex<HashMap<Uuid, ScheduleEntry>>,
}

impl Scheduler {
    pub fn new(triggers: Arc<dyn ScheduleTriggerRepository>, queue: Arc<TaskQueue>) -> Self {
        Self {
            triggers,
            queue,
            interval: DEFAULT_RECONCILE_INTERVAL,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Override the reconcile interval (builder pattern).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One reconcile pass at logical time `now`.  Returns the number of
    /// triggers fired.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> usize {
        let active = match self.triggers.list_active().await {
            Ok(triggers) => triggers,
            Err(e) => {
                log::warn!("scheduler could not list triggers: {}", e);
                return 0;
            }
        };

        let mut entries = self.entries.lock().await;

        // Drop entries for triggers that were deactivated or deleted.
        let active_ids: std::collections::HashSet<Uuid> =
            active.iter().map(|t| t.id).collect();
        entries.retain(|id, _| active_ids.contains(id));

        let mut fired = 0;
        for trigger in active {
            let schedule = match parse_cron(&trigger.cron_expression) {
                Ok(schedule) => schedule,
                Err(_) => continue,
            };
            let timezone = parse_timezone(&trigger.timezone);

            let needs_refresh = entries
                .get(&trigger.id)
                .map(|entry| entry.expression != trigger.cron_expression)
                .unwrap_or(true);
            if needs_refresh {
                let Some(next_fire) = next_fire_time(&schedule, timezone, now) else {
                    continue;
                };
                entries.insert(
                    trigger.id,
                    ScheduleEntry {
                        expression: trigger.cron_expression.clone(),
                        schedule,
                        timezone,
                        next_fire,
                    },
                );
                continue;
            }

            let Some(entry) = entries.get_mut(&trigger.id) else {
                continue;
            };
            if entry.next_fire > now {
                continue;
            }

            // Due. Compute the next fire strictly after now, which also
            // discards any older missed fires.
            let next = next_fire_time(&entry.schedule, entry.timezone, now);
            if let Some(next) = next {
                entry.next_fire = next;
            }

            if let Err(e) = self.triggers.record_run(trigger.id, now, next).await {
                log::warn!("could not record run for trigger {}: {}", trigger.id, e);
            }

            let payload = JobPayload {
                workflow_id: trigger.workflow_id,
                trigger_type: TriggerType::Schedule,
                trigger_data: json!({ "schedule_trigger_id": trigger.id }),
            };
            match self.queue.enqueue(payload).await {
                Ok(handle) => {
                    log::info!(
                        "schedule trigger {} fired workflow {} as job {}",
                        trigger.id,
                        trigger.workflow_id,
                        handle.id
                    );
                    fired += 1;
                }
                Err(e) => log::error!("could not enqueue scheduled job: {}", e),
            }
        }

        fired
    }

    /// Run the reconcile loop until the owning runtime shuts down.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.reconcile(Utc::now()).await;
            }
        })
    }
}
