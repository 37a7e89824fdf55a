use super::RuntimeError;
use crate::approval::{ApprovalDirs, ApprovalRequest};
use crate::shared::clock::Clock;
use crate::store::Vault;
use crate::task_loop::{TaskLoopController, TaskState};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub approvals_reconciled: Vec<String>,
    pub tasks_reconciled: Vec<String>,
    /// The task that was mid-flight when the process stopped.
    pub active_task: Option<TaskState>,
}

/// Boot-time cleanup. A crash between the write and delete halves of a
/// state move leaves the record in two directories; the later state wins.
pub fn recover_vault(vault: &Vault, clock: Arc<dyn Clock>) -> Result<RecoveryReport, RuntimeError> {
    let dirs = ApprovalDirs::standard();
    let approvals_reconciled = vault.reconcile::<ApprovalRequest>(&dirs.lifecycle())?;

    let controller = TaskLoopController::new(vault.clone(), clock);
    let tasks_reconciled = vault.reconcile::<TaskState>(&[
        controller.active_collection(),
        controller.archive_collection(),
    ])?;
    let active_task = controller
        .get_active_task()
        .map_err(|err| RuntimeError::Recovery(err.to_string()))?;

    vault.events().info(
        "runtime.recovered",
        json!({
            "approvalsReconciled": approvals_reconciled.len(),
            "tasksReconciled": tasks_reconciled.len(),
            "activeTask": active_task.as_ref().map(|task| task.task_id.clone()),
        }),
    );
    Ok(RecoveryReport {
        approvals_reconciled,
        tasks_reconciled,
        active_task,
    })
}
