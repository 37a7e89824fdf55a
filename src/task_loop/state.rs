use crate::store::{Entity, RecordFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    /// IN_PROGRESS and PAUSED hold the single active slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::InProgress | Self::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStrategy {
    /// Done when an iteration's output contains the completion promise.
    #[default]
    Promise,
    /// Done when the agent moves its task file into the done folder.
    FileMovement,
}

/// Snapshot of the autonomous task. Transitions consume the value and
/// return the next one; the record on disk is always the last snapshot
/// that was fully written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub task_id: String,
    pub prompt: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub status: TaskStatus,
    pub completion_strategy: CompletionStrategy,
    #[serde(default)]
    pub completion_promise: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskState {
    pub fn new(
        prompt: impl Into<String>,
        completion_strategy: CompletionStrategy,
        completion_promise: Option<String>,
        max_iterations: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            iteration: 1,
            max_iterations,
            status: TaskStatus::Pending,
            completion_strategy,
            completion_promise,
            context: None,
            requires_approval: false,
            approval_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn started(self, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::InProgress,
            updated_at: now,
            ..self
        }
    }

    pub fn next_iteration(self, context: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            iteration: self.iteration + 1,
            context: Some(context.into()),
            updated_at: now,
            ..self
        }
    }

    pub fn paused(self, approval_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Paused,
            requires_approval: true,
            approval_id: Some(approval_id.into()),
            updated_at: now,
            ..self
        }
    }

    pub fn resumed(self, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::InProgress,
            requires_approval: false,
            approval_id: None,
            updated_at: now,
            ..self
        }
    }

    pub fn with_context(self, context: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            context: Some(context.into()),
            updated_at: now,
            ..self
        }
    }

    pub fn completed(self, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Completed,
            requires_approval: false,
            updated_at: now,
            completed_at: Some(now),
            ..self
        }
    }

    pub fn failed(self, error_message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Failed,
            context: Some(error_message.into()),
            requires_approval: false,
            updated_at: now,
            completed_at: Some(now),
            ..self
        }
    }

    pub fn has_iterations_left(&self) -> bool {
        self.iteration < self.max_iterations
    }

    /// Whether `output` carries the completion promise token.
    pub fn promise_fulfilled_by(&self, output: &str) -> bool {
        match (&self.completion_strategy, &self.completion_promise) {
            (CompletionStrategy::Promise, Some(promise)) if !promise.trim().is_empty() => {
                output.contains(promise.trim())
            }
            _ => false,
        }
    }
}

impl Entity for TaskState {
    const FORMAT: RecordFormat = RecordFormat::Json;

    fn entity_id(&self) -> &str {
        &self.task_id
    }
}
