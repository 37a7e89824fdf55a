use super::{default_vault_root, ConfigError};
use crate::approval::DEFAULT_EXPIRATION_HOURS;
use crate::health::{RetryPolicy, DEFAULT_FAILURE_THRESHOLD};
use crate::schedule::cron::parse_timezone;
use crate::schedule::scheduler::DEFAULT_MISSED_GRACE_SECONDS;
use crate::schedule::DEFAULT_TIMEZONE;
use crate::task_loop::DEFAULT_MAX_ITERATIONS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_root: Option<PathBuf>,
    #[serde(default)]
    pub approvals: ApprovalSettings,
    #[serde(default)]
    pub tasks: TaskSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub poller: PollerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalSettings {
    #[serde(default = "default_expiration_hours")]
    pub default_expiration_hours: u32,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            default_expiration_hours: default_expiration_hours(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSettings {
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            default_max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_missed_grace_seconds")]
    pub missed_grace_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            missed_grace_seconds: default_missed_grace_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PollerSettings {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
        }
    }
}

fn default_expiration_hours() -> u32 {
    DEFAULT_EXPIRATION_HOURS
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_missed_grace_seconds() -> u64 {
    DEFAULT_MISSED_GRACE_SECONDS.unsigned_abs()
}

fn default_interval_seconds() -> u64 {
    30
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.vault_root {
            if !root.is_absolute() {
                return Err(ConfigError::Settings(
                    "`vault_root` must be an absolute path".to_string(),
                ));
            }
        }
        require_positive(
            "approvals.default_expiration_hours",
            u64::from(self.approvals.default_expiration_hours),
        )?;
        require_positive(
            "tasks.default_max_iterations",
            u64::from(self.tasks.default_max_iterations),
        )?;
        require_positive(
            "health.failure_threshold",
            u64::from(self.health.failure_threshold),
        )?;
        require_positive(
            "health.retry.max_attempts",
            u64::from(self.health.retry.max_attempts),
        )?;
        if self.health.retry.max_delay_ms < self.health.retry.base_delay_ms {
            return Err(ConfigError::Settings(
                "`health.retry.max_delay_ms` must be >= `health.retry.base_delay_ms`".to_string(),
            ));
        }
        parse_timezone(&self.scheduler.default_timezone).map_err(|err| {
            ConfigError::Settings(format!("`scheduler.default_timezone`: {err}"))
        })?;
        if i64::try_from(self.scheduler.missed_grace_seconds).is_err() {
            return Err(ConfigError::Settings(
                "`scheduler.missed_grace_seconds` is too large".to_string(),
            ));
        }
        require_positive("poller.interval_seconds", self.poller.interval_seconds)?;
        Ok(())
    }

    pub fn resolve_vault_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.vault_root {
            Some(root) => Ok(root.clone()),
            None => default_vault_root(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.health.retry.max_attempts,
            base_delay: Duration::from_millis(self.health.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.health.retry.max_delay_ms),
        }
    }

    pub fn missed_grace(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.scheduler.missed_grace_seconds).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(seconds).unwrap_or(chrono::Duration::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poller.interval_seconds)
    }
}

fn require_positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Settings(format!("`{key}` must be >= 1")));
    }
    Ok(())
}
