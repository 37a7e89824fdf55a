use super::state::{CompletionStrategy, TaskState, TaskStatus};
use super::TaskLoopError;
use crate::approval::{ApprovalCategory, ApprovalGate, ApprovalRequest, ApprovalStatus};
use crate::shared::clock::Clock;
use crate::store::{Collection, Vault};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Result of checking a paused task's approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalResolution {
    Resumed(TaskState),
    Failed(TaskState),
    StillPending(TaskState),
}

/// Owns the single in-flight autonomous task.
///
/// "At most one active task" is the same statement as "at most one record
/// in the active directory", so no lock file is needed while a single
/// process owns the vault.
#[derive(Clone)]
pub struct TaskLoopController {
    vault: Vault,
    clock: Arc<dyn Clock>,
    active: Collection,
    archive: Collection,
    default_max_iterations: u32,
}

impl std::fmt::Debug for TaskLoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLoopController")
            .field("active", &self.active)
            .field("archive", &self.archive)
            .field("default_max_iterations", &self.default_max_iterations)
            .finish_non_exhaustive()
    }
}

impl TaskLoopController {
    pub fn new(vault: Vault, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            clock,
            active: Collection::known("tasks/active"),
            archive: Collection::known("tasks/done"),
            default_max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_default_max_iterations(mut self, max_iterations: u32) -> Self {
        self.default_max_iterations = max_iterations.max(1);
        self
    }

    pub fn active_collection(&self) -> &Collection {
        &self.active
    }

    pub fn archive_collection(&self) -> &Collection {
        &self.archive
    }

    pub fn start_task(
        &self,
        prompt: &str,
        completion_strategy: CompletionStrategy,
        completion_promise: Option<String>,
        max_iterations: Option<u32>,
    ) -> Result<TaskState, TaskLoopError> {
        if prompt.trim().is_empty() {
            return Err(TaskLoopError::InvalidPrompt);
        }
        let max_iterations = max_iterations.unwrap_or(self.default_max_iterations);
        if max_iterations == 0 {
            return Err(TaskLoopError::InvalidMaxIterations);
        }
        let completion_promise = completion_promise.filter(|p| !p.trim().is_empty());
        if completion_strategy == CompletionStrategy::Promise && completion_promise.is_none() {
            return Err(TaskLoopError::MissingCompletionPromise);
        }
        if let Some(active) = self.get_active_task()? {
            return Err(TaskLoopError::TaskAlreadyActive {
                task_id: active.task_id,
            });
        }

        let now = self.clock.now();
        let task = TaskState::new(
            prompt.trim(),
            completion_strategy,
            completion_promise,
            max_iterations,
            now,
        )
        .started(now);
        self.vault.save(&task, &self.active)?;
        self.vault.events().info(
            "task.started",
            json!({ "taskId": task.task_id, "maxIterations": task.max_iterations }),
        );
        Ok(task)
    }

    /// The task currently IN_PROGRESS or PAUSED, if any.
    pub fn get_active_task(&self) -> Result<Option<TaskState>, TaskLoopError> {
        let mut active: Vec<TaskState> = self
            .vault
            .list_excluding::<TaskState>(&self.active, &[&self.archive])?
            .into_iter()
            .filter(|task| task.status.is_active())
            .collect();
        if active.len() > 1 {
            self.vault.events().warn(
                "task.multiple_active",
                json!({ "taskIds": active.iter().map(|t| t.task_id.as_str()).collect::<Vec<_>>() }),
            );
            active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        }
        Ok(active.into_iter().next())
    }

    /// Finds a task in the active set or the archive.
    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskState>, TaskLoopError> {
        if let Some(task) = self.vault.load::<TaskState>(task_id, &self.archive)? {
            return Ok(Some(task));
        }
        Ok(self.vault.load::<TaskState>(task_id, &self.active)?)
    }

    pub fn list_archived(&self) -> Result<Vec<TaskState>, TaskLoopError> {
        Ok(self.vault.list::<TaskState>(&self.archive)?)
    }

    pub fn increment_iteration(
        &self,
        task_id: &str,
        context: &str,
    ) -> Result<TaskState, TaskLoopError> {
        let task = self.load_active(task_id)?;
        match task.status {
            TaskStatus::InProgress => {}
            TaskStatus::Paused => {
                return Err(TaskLoopError::ApprovalPending {
                    task_id: task.task_id,
                    approval_id: task.approval_id.unwrap_or_default(),
                })
            }
            status => return Err(invalid_state(&task.task_id, status, "increment_iteration")),
        }
        if !task.has_iterations_left() {
            return Err(TaskLoopError::MaxIterationsExceeded {
                task_id: task.task_id,
                max_iterations: task.max_iterations,
            });
        }

        let next = task.next_iteration(context, self.clock.now());
        self.vault.save(&next, &self.active)?;
        self.vault.events().info(
            "task.iteration",
            json!({ "taskId": next.task_id, "iteration": next.iteration }),
        );
        Ok(next)
    }

    pub fn pause_task(&self, task_id: &str, approval_id: &str) -> Result<TaskState, TaskLoopError> {
        let task = self.load_active(task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(invalid_state(&task.task_id, task.status, "pause_task"));
        }
        let paused = task.paused(approval_id, self.clock.now());
        self.vault.save(&paused, &self.active)?;
        self.vault.events().info(
            "task.paused",
            json!({ "taskId": paused.task_id, "approvalId": approval_id }),
        );
        Ok(paused)
    }

    pub fn resume_task(&self, task_id: &str) -> Result<TaskState, TaskLoopError> {
        let task = self.load_active(task_id)?;
        if task.status != TaskStatus::Paused {
            return Err(invalid_state(&task.task_id, task.status, "resume_task"));
        }
        let resumed = task.resumed(self.clock.now());
        self.vault.save(&resumed, &self.active)?;
        self.vault
            .events()
            .info("task.resumed", json!({ "taskId": resumed.task_id }));
        Ok(resumed)
    }

    pub fn complete_task(&self, task_id: &str) -> Result<TaskState, TaskLoopError> {
        self.complete_with(task_id, None)
    }

    pub(crate) fn complete_with(
        &self,
        task_id: &str,
        context: Option<&str>,
    ) -> Result<TaskState, TaskLoopError> {
        let task = self.load_active(task_id)?;
        if !task.status.is_active() {
            return Err(invalid_state(&task.task_id, task.status, "complete_task"));
        }
        let now = self.clock.now();
        let task = match context {
            Some(context) => task.with_context(context, now),
            None => task,
        };
        let completed = task.completed(now);
        self.archive(&completed)?;
        self.vault.events().info(
            "task.completed",
            json!({ "taskId": completed.task_id, "iteration": completed.iteration }),
        );
        Ok(completed)
    }

    pub fn fail_task(&self, task_id: &str, error_message: &str) -> Result<TaskState, TaskLoopError> {
        let task = self.load_active(task_id)?;
        let failed = task.failed(error_message, self.clock.now());
        self.archive(&failed)?;
        self.vault.events().warn(
            "task.failed",
            json!({ "taskId": failed.task_id, "error": error_message }),
        );
        Ok(failed)
    }

    /// Opens an approval through `gate` and pauses the active task on it.
    pub fn request_approval(
        &self,
        gate: &ApprovalGate,
        task_id: &str,
        category: ApprovalCategory,
        payload: Map<String, Value>,
        summary: &str,
        expiration_hours: Option<u32>,
    ) -> Result<(TaskState, ApprovalRequest), TaskLoopError> {
        let task = self.load_active(task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(invalid_state(&task.task_id, task.status, "request_approval"));
        }
        let request = gate.create_request(category, payload, expiration_hours, summary)?;
        let paused = self.pause_task(task_id, &request.id)?;
        Ok((paused, request))
    }

    /// Resumes a paused task once its approval is granted, fails it when the
    /// approval was rejected or expired, and otherwise leaves it paused.
    pub fn resolve_approval(
        &self,
        gate: &ApprovalGate,
        task_id: &str,
    ) -> Result<ApprovalResolution, TaskLoopError> {
        let task = self.load_active(task_id)?;
        if task.status != TaskStatus::Paused {
            return Err(invalid_state(&task.task_id, task.status, "resolve_approval"));
        }
        let Some(approval_id) = task.approval_id.clone() else {
            return Ok(ApprovalResolution::Resumed(self.resume_task(task_id)?));
        };

        let status = gate.find(&approval_id)?.map(|request| request.status);
        match status {
            Some(ApprovalStatus::Approved | ApprovalStatus::Executed) => {
                Ok(ApprovalResolution::Resumed(self.resume_task(task_id)?))
            }
            Some(ApprovalStatus::Rejected | ApprovalStatus::Expired) | None => {
                let reason = match status {
                    Some(ApprovalStatus::Expired) => format!("approval `{approval_id}` expired"),
                    Some(_) => format!("approval `{approval_id}` was rejected"),
                    None => format!("approval `{approval_id}` no longer exists"),
                };
                Ok(ApprovalResolution::Failed(self.fail_task(task_id, &reason)?))
            }
            Some(ApprovalStatus::Pending) => Ok(ApprovalResolution::StillPending(task)),
        }
    }

    fn load_active(&self, task_id: &str) -> Result<TaskState, TaskLoopError> {
        if let Some(task) = self.vault.load::<TaskState>(task_id, &self.active)? {
            if !self.vault.contains::<TaskState>(task_id, &self.archive)? {
                return Ok(task);
            }
        }
        match self.vault.load::<TaskState>(task_id, &self.archive)? {
            Some(archived) => Err(invalid_state(task_id, archived.status, "modify archived task")),
            None => Err(TaskLoopError::NotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    fn archive(&self, task: &TaskState) -> Result<(), TaskLoopError> {
        if self.vault.move_state(task, &self.active, &self.archive)? {
            Ok(())
        } else {
            Err(TaskLoopError::NotFound {
                task_id: task.task_id.clone(),
            })
        }
    }
}

fn invalid_state(task_id: &str, status: TaskStatus, operation: &str) -> TaskLoopError {
    TaskLoopError::InvalidState {
        task_id: task_id.to_string(),
        status,
        operation: operation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn controller() -> TaskLoopController {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap(),
        ));
        TaskLoopController::new(Vault::in_memory(), clock)
    }

    fn start(controller: &TaskLoopController, max: u32) -> TaskState {
        controller
            .start_task(
                "do X",
                CompletionStrategy::Promise,
                Some("TASK_COMPLETE".to_string()),
                Some(max),
            )
            .expect("start")
    }

    #[test]
    fn start_validates_prompt_and_limits() {
        let controller = controller();
        assert!(matches!(
            controller.start_task("   ", CompletionStrategy::FileMovement, None, None),
            Err(TaskLoopError::InvalidPrompt)
        ));
        assert!(matches!(
            controller.start_task("x", CompletionStrategy::FileMovement, None, Some(0)),
            Err(TaskLoopError::InvalidMaxIterations)
        ));
        assert!(matches!(
            controller.start_task("x", CompletionStrategy::Promise, None, None),
            Err(TaskLoopError::MissingCompletionPromise)
        ));

        let task = controller
            .start_task("x", CompletionStrategy::FileMovement, None, None)
            .expect("start");
        assert_eq!(task.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(task.iteration, 1);
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn second_start_fails_until_first_task_finishes() {
        let controller = controller();
        let first = start(&controller, 3);
        let err = controller
            .start_task("another", CompletionStrategy::FileMovement, None, None)
            .expect_err("second start");
        assert!(matches!(err, TaskLoopError::TaskAlreadyActive { ref task_id } if *task_id == first.task_id));

        controller.complete_task(&first.task_id).expect("complete");
        assert!(controller.get_active_task().expect("active").is_none());
        start(&controller, 3);
    }

    #[test]
    fn iteration_ceiling_is_hard() {
        let controller = controller();
        let task = start(&controller, 3);
        let mut latest = task.clone();
        for round in 0..2 {
            latest = controller
                .increment_iteration(&task.task_id, &format!("round {round}"))
                .expect("increment");
        }
        assert_eq!(latest.iteration, 3);
        assert!(matches!(
            controller.increment_iteration(&task.task_id, "one more"),
            Err(TaskLoopError::MaxIterationsExceeded { max_iterations: 3, .. })
        ));
    }

    #[test]
    fn paused_task_blocks_iteration_and_resume_preserves_progress() {
        let controller = controller();
        let task = start(&controller, 5);
        let task = controller
            .increment_iteration(&task.task_id, "drafted reply")
            .expect("increment");

        let paused = controller
            .pause_task(&task.task_id, "approval_20260201080000_deadbeef")
            .expect("pause");
        assert!(matches!(
            controller.increment_iteration(&task.task_id, "nope"),
            Err(TaskLoopError::ApprovalPending { .. })
        ));
        assert!(matches!(
            controller.pause_task(&task.task_id, "again"),
            Err(TaskLoopError::InvalidState { .. })
        ));
        assert_eq!(
            controller.get_active_task().expect("active").expect("some"),
            paused
        );

        let resumed = controller.resume_task(&task.task_id).expect("resume");
        assert_eq!(resumed.iteration, task.iteration);
        assert_eq!(resumed.context, task.context);
        assert!(matches!(
            controller.resume_task(&task.task_id),
            Err(TaskLoopError::InvalidState { .. })
        ));
    }

    #[test]
    fn archived_tasks_report_state_errors_and_unknown_ids_not_found() {
        let controller = controller();
        let task = start(&controller, 2);
        let failed = controller.fail_task(&task.task_id, "boom").expect("fail");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.context.as_deref(), Some("boom"));
        assert!(failed.completed_at.is_some());

        assert!(matches!(
            controller.resume_task(&task.task_id),
            Err(TaskLoopError::InvalidState { status: TaskStatus::Failed, .. })
        ));
        assert!(matches!(
            controller.complete_task("missing"),
            Err(TaskLoopError::NotFound { .. })
        ));
        assert_eq!(controller.list_archived().expect("archive").len(), 1);
    }
}
