use super::executor::{ExecutionOutcome, ExecutorRegistry, FailurePolicy};
use super::{
    validate_payload, ApprovalCategory, ApprovalError, ApprovalRequest, ApprovalStatus,
    DEFAULT_EXPIRATION_HOURS,
};
use crate::shared::clock::Clock;
use crate::shared::errors::StoreError;
use crate::shared::ids;
use crate::store::{Collection, Vault};
use chrono::Duration;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// State directories of the approval lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDirs {
    pub pending: Collection,
    pub approved: Collection,
    pub rejected: Collection,
    pub done: Collection,
    pub quarantine: Collection,
}

impl ApprovalDirs {
    pub fn under(prefix: &str) -> Result<Self, StoreError> {
        let base = Collection::new(prefix)?;
        Ok(Self {
            pending: base.child("pending")?,
            approved: base.child("approved")?,
            rejected: base.child("rejected")?,
            done: base.child("done")?,
            quarantine: base.child("quarantine")?,
        })
    }

    pub fn standard() -> Self {
        Self {
            pending: Collection::known("approvals/pending"),
            approved: Collection::known("approvals/approved"),
            rejected: Collection::known("approvals/rejected"),
            done: Collection::known("approvals/done"),
            quarantine: Collection::known("approvals/quarantine"),
        }
    }

    /// Collections in lifecycle order, earliest first.
    pub fn lifecycle(&self) -> [&Collection; 5] {
        [
            &self.pending,
            &self.approved,
            &self.rejected,
            &self.quarantine,
            &self.done,
        ]
    }
}

/// Aggregate result of one [`ApprovalGate::process_queue`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Lifecycle owner for sensitive actions: create, decide, expire, execute.
pub struct ApprovalGate {
    vault: Vault,
    clock: Arc<dyn Clock>,
    executors: ExecutorRegistry,
    dirs: ApprovalDirs,
    default_expiration_hours: u32,
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("dirs", &self.dirs)
            .field("executors", &self.executors)
            .field("default_expiration_hours", &self.default_expiration_hours)
            .finish_non_exhaustive()
    }
}

impl ApprovalGate {
    pub fn new(vault: Vault, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            clock,
            executors: ExecutorRegistry::new(),
            dirs: ApprovalDirs::standard(),
            default_expiration_hours: DEFAULT_EXPIRATION_HOURS,
        }
    }

    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_default_expiration_hours(mut self, hours: u32) -> Self {
        self.default_expiration_hours = hours.max(1);
        self
    }

    pub fn with_dirs(mut self, dirs: ApprovalDirs) -> Self {
        self.dirs = dirs;
        self
    }

    pub fn dirs(&self) -> &ApprovalDirs {
        &self.dirs
    }

    pub fn executors_mut(&mut self) -> &mut ExecutorRegistry {
        &mut self.executors
    }

    pub fn create_request(
        &self,
        category: ApprovalCategory,
        payload: Map<String, Value>,
        expiration_hours: Option<u32>,
        summary: impl Into<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        validate_payload(category, &payload)?;
        let hours = expiration_hours.unwrap_or(self.default_expiration_hours);
        if hours == 0 {
            return Err(ApprovalError::InvalidExpiration(hours));
        }

        let now = self.clock.now();
        let id = ids::approval_id(now).map_err(StoreError::IdGeneration)?;
        let request = ApprovalRequest {
            id,
            category,
            payload,
            status: ApprovalStatus::Pending,
            summary: summary.into(),
            created_at: now,
            expires_at: now + Duration::hours(i64::from(hours)),
            decided_at: None,
            executed_at: None,
            last_error: None,
        };
        self.vault.save(&request, &self.dirs.pending)?;
        self.vault.events().info(
            "approval.created",
            json!({
                "id": request.id,
                "category": category.as_str(),
                "expiresAt": request.expires_at.to_rfc3339(),
            }),
        );
        Ok(request)
    }

    pub fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.list_in(&self.dirs.pending)
    }

    pub fn list_approved(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.list_in(&self.dirs.approved)
    }

    /// Rejected and expired requests; expiry is a kind of rejection.
    pub fn list_rejected(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.list_in(&self.dirs.rejected)
    }

    pub fn list_executed(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.list_in(&self.dirs.done)
    }

    pub fn list_quarantined(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.list_in(&self.dirs.quarantine)
    }

    /// Looks the request up in every state directory, latest state first.
    pub fn find(&self, id: &str) -> Result<Option<ApprovalRequest>, ApprovalError> {
        for dir in self.dirs.lifecycle().into_iter().rev() {
            if let Some(request) = self.vault.load::<ApprovalRequest>(id, dir)? {
                return Ok(Some(self.normalize(request, dir)));
            }
        }
        Ok(None)
    }

    pub fn approve(&self, id: &str) -> Result<ApprovalRequest, ApprovalError> {
        let request = self.load_pending(id)?;
        let now = self.clock.now();
        if request.is_expired_at(now) {
            return Err(ApprovalError::Expired {
                id: request.id,
                expires_at: request.expires_at,
            });
        }
        let approved = ApprovalRequest {
            status: ApprovalStatus::Approved,
            decided_at: Some(now),
            ..request
        };
        self.transition(&approved, &self.dirs.pending, &self.dirs.approved)?;
        self.vault
            .events()
            .info("approval.approved", json!({ "id": approved.id }));
        Ok(approved)
    }

    pub fn reject(&self, id: &str) -> Result<ApprovalRequest, ApprovalError> {
        let request = self.load_pending(id)?;
        let rejected = ApprovalRequest {
            status: ApprovalStatus::Rejected,
            decided_at: Some(self.clock.now()),
            ..request
        };
        self.transition(&rejected, &self.dirs.pending, &self.dirs.rejected)?;
        self.vault
            .events()
            .info("approval.rejected", json!({ "id": rejected.id }));
        Ok(rejected)
    }

    /// Moves every pending request past its deadline into `rejected/` as
    /// EXPIRED and returns them. A second call with no new expirations
    /// returns an empty list.
    pub fn check_expired(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for request in self.list_pending()? {
            if !request.is_expired_at(now) {
                continue;
            }
            let request = ApprovalRequest {
                status: ApprovalStatus::Expired,
                decided_at: Some(now),
                ..request
            };
            if self
                .vault
                .move_state(&request, &self.dirs.pending, &self.dirs.rejected)?
            {
                self.vault
                    .events()
                    .info("approval.expired", json!({ "id": request.id }));
                expired.push(request);
            }
        }
        Ok(expired)
    }

    /// Executes an approved request exactly once.
    ///
    /// Wall-clock expiry is checked again here and wins over the stored
    /// status. Returns `Ok(true)` once the request is in `done/`, and
    /// `Ok(false)` when the executor failed; the request then sits in
    /// `quarantine/` or stays in `approved/` according to the executor's
    /// failure policy.
    pub fn execute_approved(&self, request: &ApprovalRequest) -> Result<bool, ApprovalError> {
        let now = self.clock.now();
        if request.is_expired_at(now) {
            return Err(ApprovalError::Expired {
                id: request.id.clone(),
                expires_at: request.expires_at,
            });
        }
        let Some(current) = self.load_current(&request.id, &self.dirs.approved)? else {
            return Err(ApprovalError::NotFound {
                id: request.id.clone(),
            });
        };

        match self.executors.run(current.category, &current.payload) {
            ExecutionOutcome::Succeeded => {
                let executed = ApprovalRequest {
                    status: ApprovalStatus::Executed,
                    executed_at: Some(self.clock.now()),
                    last_error: None,
                    ..current
                };
                self.transition(&executed, &self.dirs.approved, &self.dirs.done)?;
                self.vault.events().info(
                    "approval.executed",
                    json!({ "id": executed.id, "category": executed.category.as_str() }),
                );
                Ok(true)
            }
            ExecutionOutcome::Failed { reason, policy } => {
                self.vault.events().error(
                    "approval.execution_failed",
                    json!({ "id": current.id, "category": current.category.as_str(), "error": reason }),
                );
                let failed = ApprovalRequest {
                    status: ApprovalStatus::Approved,
                    last_error: Some(reason),
                    ..current
                };
                match policy {
                    FailurePolicy::Quarantine => {
                        self.transition(&failed, &self.dirs.approved, &self.dirs.quarantine)?;
                        self.vault
                            .events()
                            .warn("approval.quarantined", json!({ "id": failed.id }));
                    }
                    FailurePolicy::LeaveApproved => {
                        self.vault.save(&failed, &self.dirs.approved)?;
                    }
                }
                Ok(false)
            }
        }
    }

    /// Executes approved requests one at a time in listing order. A failing
    /// item is counted and never stops the pass.
    pub fn process_queue(&self) -> Result<QueueReport, ApprovalError> {
        let mut report = QueueReport::default();
        for request in self.list_approved()? {
            match self.execute_approved(&request) {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(ApprovalError::Expired { .. }) => {
                    report.failed += 1;
                    let expired = ApprovalRequest {
                        status: ApprovalStatus::Expired,
                        ..request
                    };
                    if let Err(err) =
                        self.vault
                            .move_state(&expired, &self.dirs.approved, &self.dirs.rejected)
                    {
                        self.log_queue_error(&expired.id, &err.to_string());
                    } else {
                        self.vault
                            .events()
                            .info("approval.expired", json!({ "id": expired.id }));
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    self.log_queue_error(&request.id, &err.to_string());
                }
            }
        }
        Ok(report)
    }

    fn log_queue_error(&self, id: &str, error: &str) {
        self.vault.events().error(
            "approval.queue_error",
            json!({ "id": id, "error": error }),
        );
    }

    fn load_pending(&self, id: &str) -> Result<ApprovalRequest, ApprovalError> {
        self.load_current(id, &self.dirs.pending)?
            .ok_or_else(|| ApprovalError::NotFound { id: id.to_string() })
    }

    /// Loads `id` from `dir` unless a later state already holds it; the
    /// later copy is the one an interrupted move was writing.
    fn load_current(
        &self,
        id: &str,
        dir: &Collection,
    ) -> Result<Option<ApprovalRequest>, ApprovalError> {
        for later in self.later_than(dir) {
            if self.vault.contains::<ApprovalRequest>(id, later)? {
                return Ok(None);
            }
        }
        Ok(self.vault.load::<ApprovalRequest>(id, dir)?)
    }

    fn later_than(&self, dir: &Collection) -> Vec<&Collection> {
        self.dirs
            .lifecycle()
            .into_iter()
            .skip_while(|candidate| *candidate != dir)
            .skip(1)
            .collect()
    }

    fn transition(
        &self,
        request: &ApprovalRequest,
        from: &Collection,
        to: &Collection,
    ) -> Result<(), ApprovalError> {
        if self.vault.move_state(request, from, to)? {
            Ok(())
        } else {
            Err(ApprovalError::NotFound {
                id: request.id.clone(),
            })
        }
    }

    fn list_in(&self, dir: &Collection) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        Ok(self
            .vault
            .list_excluding::<ApprovalRequest>(dir, &self.later_than(dir))?
            .into_iter()
            .map(|request| self.normalize(request, dir))
            .collect())
    }

    /// The directory a record sits in decides its status; an approver who
    /// moves a file by hand never touches the front matter.
    fn normalize(&self, mut request: ApprovalRequest, dir: &Collection) -> ApprovalRequest {
        request.status = if dir == &self.dirs.pending {
            ApprovalStatus::Pending
        } else if dir == &self.dirs.approved || dir == &self.dirs.quarantine {
            ApprovalStatus::Approved
        } else if dir == &self.dirs.rejected {
            if request.status == ApprovalStatus::Expired {
                ApprovalStatus::Expired
            } else {
                ApprovalStatus::Rejected
            }
        } else if dir == &self.dirs.done {
            ApprovalStatus::Executed
        } else {
            request.status
        };
        request
    }
}
