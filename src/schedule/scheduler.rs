use super::executor::TaskTypeRegistry;
use super::{
    MissedStrategy, RunResult, ScheduleError, ScheduledTask, DEFAULT_TIMEZONE,
    SCHEDULES_COLLECTION,
};
use crate::shared::clock::Clock;
use crate::shared::ids;
use crate::store::{Collection, Vault};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

pub const DEFAULT_MISSED_GRACE_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedAction {
    Skipped,
    Ran,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedOutcome {
    pub task_id: String,
    pub action: MissedAction,
    pub result: Option<RunResult>,
}

/// Counts from one [`Scheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerTickReport {
    pub ran: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

pub struct Scheduler {
    vault: Vault,
    clock: Arc<dyn Clock>,
    executors: TaskTypeRegistry,
    collection: Collection,
    default_timezone: String,
    missed_grace: Duration,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("collection", &self.collection)
            .field("executors", &self.executors)
            .field("default_timezone", &self.default_timezone)
            .field("missed_grace", &self.missed_grace)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(vault: Vault, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            clock,
            executors: TaskTypeRegistry::new(),
            collection: Collection::known(SCHEDULES_COLLECTION),
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            missed_grace: Duration::seconds(DEFAULT_MISSED_GRACE_SECONDS),
        }
    }

    pub fn with_executors(mut self, executors: TaskTypeRegistry) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    /// How late a run may start and still count as on time in [`tick`].
    ///
    /// [`tick`]: Scheduler::tick
    pub fn with_missed_grace(mut self, grace: Duration) -> Self {
        self.missed_grace = grace.max(Duration::zero());
        self
    }

    pub fn executors_mut(&mut self) -> &mut TaskTypeRegistry {
        &mut self.executors
    }

    /// Adds or updates a task. The id comes from the name, so adding a task
    /// with a known name replaces its definition while keeping its run
    /// history. Returns `true` when the task is new.
    pub fn add(&self, mut task: ScheduledTask) -> Result<bool, ScheduleError> {
        if task.name.trim().is_empty() {
            return Err(ScheduleError::InvalidName(
                "scheduled task name must be non-empty".to_string(),
            ));
        }
        task.id = ids::schedule_id(&task.name).map_err(ScheduleError::InvalidName)?;
        if task.timezone.trim().is_empty() {
            task.timezone = self.default_timezone.clone();
        }
        let schedule = task.parsed_schedule()?;

        let existing = self.vault.load::<ScheduledTask>(&task.id, &self.collection)?;
        let is_new = existing.is_none();
        let mut has_run = false;
        if let Some(previous) = existing {
            has_run = previous.last_run.is_some() && previous.schedule == task.schedule;
            task.last_run = previous.last_run;
            task.last_result = previous.last_result;
            task.error = previous.error;
        }
        task.next_run = schedule.next_run(self.clock.now(), has_run);

        self.vault.save(&task, &self.collection)?;
        self.vault.events().info(
            if is_new {
                "schedule.added"
            } else {
                "schedule.updated"
            },
            json!({
                "id": task.id,
                "name": task.name,
                "schedule": task.schedule,
                "nextRun": task.next_run.map(|at| at.to_rfc3339()),
            }),
        );
        Ok(is_new)
    }

    pub fn remove(&self, id: &str) -> Result<bool, ScheduleError> {
        let removed = self.vault.remove::<ScheduledTask>(id, &self.collection)?;
        if removed {
            self.vault
                .events()
                .info("schedule.removed", json!({ "id": id }));
        }
        Ok(removed)
    }

    /// Enables the task and recomputes its next run from now.
    pub fn enable(&self, id: &str) -> Result<ScheduledTask, ScheduleError> {
        let mut task = self.load(id)?;
        let schedule = task.parsed_schedule()?;
        task.enabled = true;
        task.next_run = schedule.next_run(self.clock.now(), task.last_run.is_some());
        self.vault.save(&task, &self.collection)?;
        Ok(task)
    }

    pub fn disable(&self, id: &str) -> Result<ScheduledTask, ScheduleError> {
        let mut task = self.load(id)?;
        task.enabled = false;
        self.vault.save(&task, &self.collection)?;
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Result<Option<ScheduledTask>, ScheduleError> {
        Ok(self.vault.load::<ScheduledTask>(id, &self.collection)?)
    }

    pub fn list(&self) -> Result<Vec<ScheduledTask>, ScheduleError> {
        Ok(self.vault.list::<ScheduledTask>(&self.collection)?)
    }

    /// Runs the task now. The run is recorded whether it succeeds or not;
    /// a one-shot task is disabled once it has run.
    pub fn run(&self, id: &str) -> Result<RunResult, ScheduleError> {
        let task = self.load(id)?;
        if !task.enabled {
            return Err(ScheduleError::Disabled { id: task.id });
        }
        let schedule = match task.parsed_schedule() {
            Ok(schedule) => schedule,
            Err(err) => {
                let broken = ScheduledTask {
                    error: Some(err.to_string()),
                    ..task
                };
                self.vault.save(&broken, &self.collection)?;
                return Err(err);
            }
        };

        let result = self.executors.run(&task);
        let now = self.clock.now();
        let mut updated = ScheduledTask {
            last_run: Some(now),
            last_result: Some(
                result
                    .message
                    .clone()
                    .unwrap_or_else(|| "failed".to_string()),
            ),
            error: result.error.clone(),
            next_run: schedule.next_run(now, true),
            ..task
        };
        if schedule.is_one_shot() {
            updated.enabled = false;
        }
        self.vault.save(&updated, &self.collection)?;

        let fields = json!({
            "id": updated.id,
            "taskType": updated.task_type.as_str(),
            "success": result.success,
            "error": result.error,
            "nextRun": updated.next_run.map(|at| at.to_rfc3339()),
        });
        if result.success {
            self.vault.events().info("schedule.run", fields);
        } else {
            self.vault.events().warn("schedule.run", fields);
        }
        Ok(result)
    }

    /// Enabled tasks whose next run is already in the past.
    pub fn get_missed(&self) -> Result<Vec<ScheduledTask>, ScheduleError> {
        let now = self.clock.now();
        Ok(self
            .list()?
            .into_iter()
            .filter(|task| task.enabled && task.next_run.is_some_and(|at| at < now))
            .collect())
    }

    /// Applies the task's missed-run strategy. SKIP moves `next_run` to the
    /// next future occurrence without running; RUN_IMMEDIATELY and QUEUE
    /// both run now.
    pub fn handle_missed(&self, id: &str) -> Result<MissedOutcome, ScheduleError> {
        let task = self.load(id)?;
        self.vault.events().info(
            "schedule.missed",
            json!({
                "id": task.id,
                "strategy": task.missed_strategy.as_str(),
                "nextRun": task.next_run.map(|at| at.to_rfc3339()),
            }),
        );
        match task.missed_strategy {
            MissedStrategy::Skip => {
                let schedule = task.parsed_schedule()?;
                let now = self.clock.now();
                let mut skipped = ScheduledTask {
                    next_run: schedule.next_run(now, true),
                    last_result: Some("skipped_missed".to_string()),
                    ..task
                };
                if schedule.is_one_shot() {
                    skipped.enabled = false;
                }
                self.vault.save(&skipped, &self.collection)?;
                Ok(MissedOutcome {
                    task_id: skipped.id,
                    action: MissedAction::Skipped,
                    result: None,
                })
            }
            MissedStrategy::RunImmediately | MissedStrategy::Queue => {
                let result = self.run(&task.id)?;
                Ok(MissedOutcome {
                    task_id: task.id,
                    action: MissedAction::Ran,
                    result: Some(result),
                })
            }
        }
    }

    /// Runs every enabled task that is due. A task more than the grace
    /// window late is handed to [`Scheduler::handle_missed`]. Errors are
    /// collected per task so one broken record never stops the rest.
    pub fn tick(&self) -> Result<SchedulerTickReport, ScheduleError> {
        let now = self.clock.now();
        let mut report = SchedulerTickReport::default();
        for task in self.list()? {
            let Some(next_run) = task.next_run else {
                continue;
            };
            if !task.enabled || next_run > now {
                continue;
            }
            let outcome = if is_late(next_run, now, self.missed_grace) {
                self.handle_missed(&task.id).map(|missed| missed.result)
            } else {
                self.run(&task.id).map(Some)
            };
            match outcome {
                Ok(Some(result)) if result.success => report.ran += 1,
                Ok(Some(_)) => report.failed += 1,
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    self.vault.events().error(
                        "schedule.tick_error",
                        json!({ "id": task.id, "error": err.to_string() }),
                    );
                    report.errors.push(format!("{}: {err}", task.id));
                }
            }
        }
        Ok(report)
    }

    fn load(&self, id: &str) -> Result<ScheduledTask, ScheduleError> {
        self.vault
            .load::<ScheduledTask>(id, &self.collection)?
            .ok_or_else(|| ScheduleError::NotFound { id: id.to_string() })
    }
}

fn is_late(next_run: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> bool {
    now - next_run > grace
}
