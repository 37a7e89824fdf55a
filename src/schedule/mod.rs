//! Recurring and one-shot scheduled work with missed-run recovery.

pub mod cron;
pub mod executor;
pub mod scheduler;

pub use cron::{CronExpression, Schedule};
pub use executor::{TaskTypeExecutor, TaskTypeRegistry};
pub use scheduler::{MissedAction, MissedOutcome, Scheduler, SchedulerTickReport};

use crate::shared::errors::StoreError;
use crate::store::{Entity, RecordFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const SCHEDULES_COLLECTION: &str = "schedules";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Briefing,
    Audit,
    UpdateDashboard,
    CheckApprovals,
    Custom,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Briefing => "briefing",
            Self::Audit => "audit",
            Self::UpdateDashboard => "update_dashboard",
            Self::CheckApprovals => "check_approvals",
            Self::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "briefing" => Ok(Self::Briefing),
            "audit" => Ok(Self::Audit),
            "update_dashboard" => Ok(Self::UpdateDashboard),
            "check_approvals" => Ok(Self::CheckApprovals),
            "custom" => Ok(Self::Custom),
            _ => Err(
                "task type must be one of: briefing, audit, update_dashboard, check_approvals, custom"
                    .to_string(),
            ),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedStrategy {
    Skip,
    #[default]
    RunImmediately,
    /// Currently runs immediately as well; no deferred queue exists.
    Queue,
}

impl MissedStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::RunImmediately => "run_immediately",
            Self::Queue => "queue",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Five-field cron expression or an ISO-8601 timestamp for one-shot runs.
    pub schedule: String,
    pub task_type: TaskType,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub missed_strategy: MissedStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn enabled_default() -> bool {
    true
}

impl ScheduledTask {
    /// An enabled task in the scheduler's default timezone. The id is
    /// assigned from the name when the task is added.
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            schedule: schedule.into(),
            task_type,
            enabled: true,
            timezone: String::new(),
            missed_strategy: MissedStrategy::default(),
            last_run: None,
            next_run: None,
            last_result: None,
            error: None,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_missed_strategy(mut self, strategy: MissedStrategy) -> Self {
        self.missed_strategy = strategy;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn parsed_schedule(&self) -> Result<Schedule, ScheduleError> {
        let timezone = if self.timezone.trim().is_empty() {
            DEFAULT_TIMEZONE
        } else {
            self.timezone.as_str()
        };
        cron::parse_timezone(timezone).map_err(ScheduleError::InvalidTimezone)?;
        Schedule::parse(&self.schedule, timezone).map_err(ScheduleError::InvalidSchedule)
    }
}

impl Entity for ScheduledTask {
    const FORMAT: RecordFormat = RecordFormat::Markdown;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn markdown_body(&self) -> String {
        let mut body = format!(
            "# {}\n\n- Type: {}\n- Schedule: `{}` ({})\n- Enabled: {}\n",
            self.name,
            self.task_type,
            self.schedule,
            if self.timezone.is_empty() {
                DEFAULT_TIMEZONE
            } else {
                self.timezone.as_str()
            },
            if self.enabled { "yes" } else { "no" },
        );
        if let Some(next_run) = self.next_run {
            body.push_str(&format!("- Next run: {}\n", next_run.to_rfc3339()));
        }
        if let Some(error) = &self.error {
            body.push_str(&format!("\nLast error: {error}\n"));
        }
        body
    }
}

/// Outcome of one scheduled run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl RunResult {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("{0}")]
    InvalidTimezone(String),
    #[error("invalid scheduled task name: {0}")]
    InvalidName(String),
    #[error("scheduled task `{id}` not found")]
    NotFound { id: String },
    #[error("scheduled task `{id}` is disabled")]
    Disabled { id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
