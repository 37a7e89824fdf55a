use super::classify::classify_error;
use super::{
    HealthError, OperationStatus, QueuedOperation, ServiceHealth, ServiceStatus,
    DEFAULT_FAILURE_THRESHOLD,
};
use crate::shared::clock::Clock;
use crate::shared::errors::{panic_message, StoreError};
use crate::shared::ids;
use crate::shared::logging::EventLog;
use crate::store::{Collection, Vault};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Counts from one drain or replay pass over a service queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Tracks consecutive failures per external service and owns the
/// `queue/<service>` directories of deferred calls.
///
/// Health records live in memory for the life of the process; only the
/// queue is durable, and queue counters are rebuilt from it on register.
pub struct ServiceHealthTracker {
    vault: Vault,
    clock: Arc<dyn Clock>,
    services: BTreeMap<String, ServiceHealth>,
    failure_threshold: u32,
    queue_root: Collection,
}

impl std::fmt::Debug for ServiceHealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHealthTracker")
            .field("services", &self.services)
            .field("failure_threshold", &self.failure_threshold)
            .finish_non_exhaustive()
    }
}

impl ServiceHealthTracker {
    pub fn new(vault: Vault, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            clock,
            services: BTreeMap::new(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            queue_root: Collection::known("queue"),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn events(&self) -> &EventLog {
        self.vault.events()
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Registers a service. The first registration wins; later calls return
    /// the existing record unchanged.
    pub fn register(
        &mut self,
        service_name: &str,
        display_name: &str,
        is_critical: bool,
    ) -> Result<ServiceHealth, HealthError> {
        if let Some(existing) = self.services.get(service_name) {
            return Ok(existing.clone());
        }
        ids::validate_identifier_value("service name", service_name)
            .map_err(HealthError::InvalidServiceName)?;
        let queued = self
            .vault
            .ids::<QueuedOperation>(&self.queue_collection(service_name)?)?
            .len();
        let health = ServiceHealth {
            service_name: service_name.to_string(),
            display_name: display_name.to_string(),
            status: ServiceStatus::Unknown,
            consecutive_failures: 0,
            last_error: None,
            error_category: None,
            is_critical,
            queued_operations: u32::try_from(queued).unwrap_or(u32::MAX),
            last_failure_at: None,
            last_success_at: None,
        };
        self.services
            .insert(service_name.to_string(), health.clone());
        Ok(health)
    }

    pub fn record_success(&mut self, service_name: &str) -> Result<ServiceHealth, HealthError> {
        let now = self.clock.now();
        let events = self.vault.events().clone();
        let health = self.entry_mut(service_name)?;
        let recovered = matches!(
            health.status,
            ServiceStatus::Degraded | ServiceStatus::Down
        );
        health.consecutive_failures = 0;
        health.last_error = None;
        health.error_category = None;
        health.status = ServiceStatus::Healthy;
        health.last_success_at = Some(now);
        if recovered {
            events.info(
                "health.recovered",
                json!({ "service": service_name }),
            );
        }
        Ok(health.clone())
    }

    pub fn record_failure(
        &mut self,
        service_name: &str,
        error: &str,
    ) -> Result<ServiceHealth, HealthError> {
        let now = self.clock.now();
        let threshold = self.failure_threshold;
        let events = self.vault.events().clone();
        let health = self.entry_mut(service_name)?;
        let category = classify_error(error);
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_error = Some(error.to_string());
        health.error_category = Some(category);
        health.status = ServiceStatus::from_failures(health.consecutive_failures, threshold);
        health.last_failure_at = Some(now);

        let fields = json!({
            "service": service_name,
            "status": health.status.as_str(),
            "consecutiveFailures": health.consecutive_failures,
            "category": category.as_str(),
            "error": error,
        });
        if health.status == ServiceStatus::Down {
            events.warn("health.failure", fields);
        } else {
            events.info("health.failure", fields);
        }
        Ok(health.clone())
    }

    /// Unregistered services are never available.
    pub fn is_available(&self, service_name: &str) -> bool {
        self.services
            .get(service_name)
            .is_some_and(ServiceHealth::is_available)
    }

    pub fn get(&self, service_name: &str) -> Option<&ServiceHealth> {
        self.services.get(service_name)
    }

    pub fn list(&self) -> Vec<ServiceHealth> {
        self.services.values().cloned().collect()
    }

    pub fn list_degraded(&self) -> Vec<ServiceHealth> {
        self.services
            .values()
            .filter(|health| {
                matches!(
                    health.status,
                    ServiceStatus::Degraded | ServiceStatus::Down
                )
            })
            .cloned()
            .collect()
    }

    pub fn queue_failed_operation(
        &mut self,
        service_name: &str,
        operation_type: &str,
        parameters: Map<String, Value>,
    ) -> Result<String, HealthError> {
        self.entry_mut(service_name)?;
        let now = self.clock.now();
        let operation = QueuedOperation {
            id: ids::operation_id(now).map_err(StoreError::IdGeneration)?,
            service_name: service_name.to_string(),
            operation_type: operation_type.to_string(),
            parameters,
            queued_at: now,
            status: OperationStatus::Queued,
            attempts: 0,
            last_error: None,
        };
        let collection = self.queue_collection(service_name)?;
        self.vault.save(&operation, &collection)?;

        let health = self.entry_mut(service_name)?;
        health.queued_operations = health.queued_operations.saturating_add(1);
        let queued = health.queued_operations;
        self.vault.events().info(
            "health.queued",
            json!({
                "service": service_name,
                "operationId": operation.id,
                "operationType": operation_type,
                "queued": queued,
            }),
        );
        Ok(operation.id)
    }

    /// Queued operations for a service, oldest first.
    pub fn list_queue(&self, service_name: &str) -> Result<Vec<QueuedOperation>, HealthError> {
        self.ensure_registered(service_name)?;
        Ok(self
            .vault
            .list::<QueuedOperation>(&self.queue_collection(service_name)?)?)
    }

    /// Acknowledges and clears every queued operation without replaying it.
    pub fn drain_queue(&mut self, service_name: &str) -> Result<DrainReport, HealthError> {
        self.ensure_registered(service_name)?;
        let collection = self.queue_collection(service_name)?;
        let ids = self.vault.ids::<QueuedOperation>(&collection)?;
        let mut report = DrainReport {
            total: ids.len(),
            ..DrainReport::default()
        };
        for id in &ids {
            match self.vault.remove::<QueuedOperation>(id, &collection) {
                Ok(_) => report.processed += 1,
                Err(err) => {
                    report.failed += 1;
                    self.vault.events().error(
                        "health.drain_failed",
                        json!({ "service": service_name, "operationId": id, "error": err.to_string() }),
                    );
                }
            }
        }
        self.settle_counter(service_name, report.processed);
        self.vault.events().info(
            "health.drained",
            json!({
                "service": service_name,
                "total": report.total,
                "processed": report.processed,
                "failed": report.failed,
            }),
        );
        Ok(report)
    }

    /// Replays queued operations through `handler`, oldest first. Successful
    /// operations are removed; failed ones stay queued with the attempt
    /// recorded. A panicking handler counts as a failure.
    pub fn replay_queue(
        &mut self,
        service_name: &str,
        handler: &mut dyn FnMut(&QueuedOperation) -> Result<(), String>,
    ) -> Result<DrainReport, HealthError> {
        let operations = self.list_queue(service_name)?;
        let collection = self.queue_collection(service_name)?;
        let mut report = DrainReport {
            total: operations.len(),
            ..DrainReport::default()
        };
        for operation in operations {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&operation)))
                .unwrap_or_else(|panic| {
                    Err(format!("handler panicked: {}", panic_message(panic.as_ref())))
                });
            match outcome {
                Ok(()) => {
                    self.vault
                        .remove::<QueuedOperation>(&operation.id, &collection)?;
                    report.processed += 1;
                }
                Err(reason) => {
                    report.failed += 1;
                    let retried = QueuedOperation {
                        status: OperationStatus::Retrying,
                        attempts: operation.attempts.saturating_add(1),
                        last_error: Some(reason.clone()),
                        ..operation
                    };
                    self.vault.save(&retried, &collection)?;
                    self.vault.events().warn(
                        "health.replay_failed",
                        json!({
                            "service": service_name,
                            "operationId": retried.id,
                            "attempts": retried.attempts,
                            "error": reason,
                        }),
                    );
                }
            }
        }
        self.settle_counter(service_name, report.processed);
        self.vault.events().info(
            "health.replayed",
            json!({
                "service": service_name,
                "total": report.total,
                "processed": report.processed,
                "failed": report.failed,
            }),
        );
        Ok(report)
    }

    /// Names of registered services, sorted.
    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    fn settle_counter(&mut self, service_name: &str, removed: usize) {
        if let Some(health) = self.services.get_mut(service_name) {
            let removed = u32::try_from(removed).unwrap_or(u32::MAX);
            health.queued_operations = health.queued_operations.saturating_sub(removed);
        }
    }

    fn queue_collection(&self, service_name: &str) -> Result<Collection, HealthError> {
        self.queue_root
            .child(service_name)
            .map_err(|err| HealthError::InvalidServiceName(err.to_string()))
    }

    fn ensure_registered(&self, service_name: &str) -> Result<(), HealthError> {
        if self.services.contains_key(service_name) {
            Ok(())
        } else {
            Err(not_registered(service_name))
        }
    }

    fn entry_mut(&mut self, service_name: &str) -> Result<&mut ServiceHealth, HealthError> {
        self.services
            .get_mut(service_name)
            .ok_or_else(|| not_registered(service_name))
    }
}

fn not_registered(service_name: &str) -> HealthError {
    HealthError::NotRegistered {
        service: service_name.to_string(),
    }
}
