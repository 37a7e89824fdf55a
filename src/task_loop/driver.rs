use super::controller::TaskLoopController;
use super::state::{CompletionStrategy, TaskState, TaskStatus};
use super::TaskLoopError;

/// What one iteration of the agent runtime produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub context: String,
    /// The agent moved its task file into the done folder.
    pub task_file_moved: bool,
}

/// The agent runtime that advances a task by one iteration.
pub trait IterationDriver {
    fn iterate(&mut self, task: &TaskState) -> Result<IterationReport, String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Continued(TaskState),
    Completed(TaskState),
    Failed(TaskState),
    AwaitingApproval(TaskState),
}

/// Runs one iteration of `task_id` and applies its result.
///
/// A driver error fails the task. Reaching the iteration ceiling without
/// completion also fails it, with the ceiling named in the task context.
pub fn step(
    controller: &TaskLoopController,
    task_id: &str,
    driver: &mut dyn IterationDriver,
) -> Result<StepOutcome, TaskLoopError> {
    let Some(task) = controller.get_task(task_id)? else {
        return Err(TaskLoopError::NotFound {
            task_id: task_id.to_string(),
        });
    };
    match task.status {
        TaskStatus::Paused => return Ok(StepOutcome::AwaitingApproval(task)),
        TaskStatus::InProgress => {}
        status => {
            return Err(TaskLoopError::InvalidState {
                task_id: task.task_id,
                status,
                operation: "step".to_string(),
            })
        }
    }

    let report = match driver.iterate(&task) {
        Ok(report) => report,
        Err(reason) => {
            let message = format!("iteration {} failed: {reason}", task.iteration);
            return Ok(StepOutcome::Failed(controller.fail_task(task_id, &message)?));
        }
    };

    let done = match task.completion_strategy {
        CompletionStrategy::Promise => task.promise_fulfilled_by(&report.context),
        CompletionStrategy::FileMovement => report.task_file_moved,
    };
    if done {
        return Ok(StepOutcome::Completed(
            controller.complete_with(task_id, Some(&report.context))?,
        ));
    }

    if !task.has_iterations_left() {
        let message = format!(
            "reached max iterations ({}) without completion; last output: {}",
            task.max_iterations, report.context
        );
        return Ok(StepOutcome::Failed(controller.fail_task(task_id, &message)?));
    }

    Ok(StepOutcome::Continued(
        controller.increment_iteration(task_id, &report.context)?,
    ))
}
