use super::ApprovalCategory;
use crate::shared::errors::panic_message;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Move the request to `quarantine/` for manual inspection.
    Quarantine,
    /// Keep the request in `approved/`; the next queue pass retries it.
    LeaveApproved,
}

/// Performs the side effect an approval authorizes.
pub trait CategoryExecutor: Send + Sync {
    fn execute(&self, payload: &Map<String, Value>) -> Result<(), String>;
}

impl<F> CategoryExecutor for F
where
    F: Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync,
{
    fn execute(&self, payload: &Map<String, Value>) -> Result<(), String> {
        self(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed {
        reason: String,
        policy: FailurePolicy,
    },
}

struct Registered {
    executor: Box<dyn CategoryExecutor>,
    policy: FailurePolicy,
}

#[derive(Default)]
pub struct ExecutorRegistry {
    entries: BTreeMap<ApprovalCategory, Registered>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("categories", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        category: ApprovalCategory,
        executor: impl CategoryExecutor + 'static,
    ) -> &mut Self {
        self.register_with_policy(category, executor, category.default_failure_policy())
    }

    pub fn register_with_policy(
        &mut self,
        category: ApprovalCategory,
        executor: impl CategoryExecutor + 'static,
        policy: FailurePolicy,
    ) -> &mut Self {
        self.entries.insert(
            category,
            Registered {
                executor: Box::new(executor),
                policy,
            },
        );
        self
    }

    pub fn has(&self, category: ApprovalCategory) -> bool {
        self.entries.contains_key(&category)
    }

    /// Runs the executor for `category`. Errors and panics both come back as
    /// [`ExecutionOutcome::Failed`].
    pub fn run(&self, category: ApprovalCategory, payload: &Map<String, Value>) -> ExecutionOutcome {
        let Some(entry) = self.entries.get(&category) else {
            return ExecutionOutcome::Failed {
                reason: format!("no executor registered for category `{category}`"),
                policy: FailurePolicy::LeaveApproved,
            };
        };

        let result = catch_unwind(AssertUnwindSafe(|| entry.executor.execute(payload)));
        match result {
            Ok(Ok(())) => ExecutionOutcome::Succeeded,
            Ok(Err(reason)) => ExecutionOutcome::Failed {
                reason,
                policy: entry.policy,
            },
            Err(panic) => ExecutionOutcome::Failed {
                reason: format!("executor panicked: {}", panic_message(panic.as_ref())),
                policy: entry.policy,
            },
        }
    }
}
