//! Per-service health tracking and the deferred-operation retry queue.

pub mod classify;
pub mod retry;
pub mod tracker;

pub use classify::classify_error;
pub use retry::{backoff_delay, retry_with_backoff, RetryError, RetryPolicy};
pub use tracker::{DrainReport, ServiceHealthTracker};

use crate::shared::errors::StoreError;
use crate::store::{Entity, RecordFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Unknown,
    Healthy,
    Degraded,
    Down,
}

impl ServiceStatus {
    /// Status is derived from the failure streak alone.
    pub fn from_failures(consecutive_failures: u32, threshold: u32) -> Self {
        match consecutive_failures {
            0 => Self::Healthy,
            n if n >= threshold.max(1) => Self::Down,
            _ => Self::Degraded,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Authentication,
    Permanent,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Authentication => "authentication",
            Self::Permanent => "permanent",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub display_name: String,
    pub status: ServiceStatus,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub is_critical: bool,
    pub queued_operations: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl ServiceHealth {
    /// DOWN is the only unavailable state; UNKNOWN services are tried.
    pub fn is_available(&self) -> bool {
        self.status != ServiceStatus::Down
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Retrying,
}

/// A call deferred while its service was unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    pub service_name: String,
    pub operation_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub queued_at: DateTime<Utc>,
    pub status: OperationStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Entity for QueuedOperation {
    const FORMAT: RecordFormat = RecordFormat::Json;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("service `{service}` is not registered")]
    NotRegistered { service: String },
    #[error("invalid service name: {0}")]
    InvalidServiceName(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
