use super::{RunResult, ScheduledTask, TaskType};
use crate::shared::errors::panic_message;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// One unit of scheduled work. `Ok` carries a short result message.
pub trait TaskTypeExecutor: Send + Sync {
    fn execute(&self, task: &ScheduledTask) -> Result<String, String>;
}

impl<F> TaskTypeExecutor for F
where
    F: Fn(&ScheduledTask) -> Result<String, String> + Send + Sync,
{
    fn execute(&self, task: &ScheduledTask) -> Result<String, String> {
        self(task)
    }
}

#[derive(Default)]
pub struct TaskTypeRegistry {
    executors: BTreeMap<TaskType, Box<dyn TaskTypeExecutor>>,
}

impl std::fmt::Debug for TaskTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTypeRegistry")
            .field("task_types", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: TaskType,
        executor: impl TaskTypeExecutor + 'static,
    ) -> &mut Self {
        self.executors.insert(task_type, Box::new(executor));
        self
    }

    pub fn has(&self, task_type: TaskType) -> bool {
        self.executors.contains_key(&task_type)
    }

    /// Runs the executor for the task's type. CUSTOM tasks without an
    /// executor succeed as a no-op; built-in types without one fail.
    pub fn run(&self, task: &ScheduledTask) -> RunResult {
        let Some(executor) = self.executors.get(&task.task_type) else {
            return if task.task_type == TaskType::Custom {
                RunResult::succeeded("custom task: nothing to run")
            } else {
                RunResult::failed(format!(
                    "no executor registered for task type {}",
                    task.task_type
                ))
            };
        };
        match catch_unwind(AssertUnwindSafe(|| executor.execute(task))) {
            Ok(Ok(message)) => RunResult::succeeded(message),
            Ok(Err(error)) => RunResult::failed(error),
            Err(panic) => RunResult::failed(format!(
                "executor panicked: {}",
                panic_message(panic.as_ref())
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(task_type: TaskType) -> ScheduledTask {
        ScheduledTask::new("Morning briefing", "0 8 * * *", task_type)
    }

    #[test]
    fn custom_is_a_noop_and_builtins_need_executors() {
        let registry = TaskTypeRegistry::new();
        assert!(!registry.has(TaskType::Custom));
        assert!(registry.run(&task(TaskType::Custom)).success);
        let missing = registry.run(&task(TaskType::Briefing));
        assert!(!missing.success);
        assert!(missing.error.unwrap_or_default().contains("briefing"));
    }

    #[test]
    fn executor_panics_become_failures() {
        let mut registry = TaskTypeRegistry::new();
        registry
            .register(TaskType::Audit, |_: &ScheduledTask| -> Result<String, String> {
                panic!("ledger unreachable")
            })
            .register(TaskType::Briefing, |task: &ScheduledTask| -> Result<String, String> {
                Ok(format!("briefed for {}", task.name))
            });

        assert!(registry.has(TaskType::Audit));
        assert!(!registry.has(TaskType::UpdateDashboard));
        let audit = registry.run(&task(TaskType::Audit));
        assert!(!audit.success);
        assert!(audit.error.unwrap_or_default().contains("ledger unreachable"));

        let briefing = registry.run(&task(TaskType::Briefing));
        assert!(briefing.success);
        assert_eq!(briefing.message.as_deref(), Some("briefed for Morning briefing"));
    }
}
