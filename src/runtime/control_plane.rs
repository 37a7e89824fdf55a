use super::recovery::{recover_vault, RecoveryReport};
use super::state_paths::{bootstrap_vault, VaultPaths};
use super::RuntimeError;
use crate::approval::{ApprovalGate, QueueReport};
use crate::config::Settings;
use crate::health::{
    retry_with_backoff, DrainReport, QueuedOperation, RetryError, RetryPolicy,
    ServiceHealthTracker,
};
use crate::schedule::{Scheduler, SchedulerTickReport};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::logging::EventLog;
use crate::store::Vault;
use crate::task_loop::TaskLoopController;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

type ReplayHandler = Box<dyn FnMut(&QueuedOperation) -> Result<(), String> + Send>;

/// What one control-plane tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub expired: usize,
    pub approvals: QueueReport,
    pub drained: Vec<(String, DrainReport)>,
    pub schedule: SchedulerTickReport,
    pub errors: Vec<String>,
}

/// The four components wired over one vault and one clock.
pub struct ControlPlane {
    gate: ApprovalGate,
    tasks: TaskLoopController,
    health: ServiceHealthTracker,
    scheduler: Scheduler,
    replay_handlers: BTreeMap<String, ReplayHandler>,
    retry_policy: RetryPolicy,
    events: EventLog,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("health", &self.health)
            .field(
                "replay_handlers",
                &self.replay_handlers.keys().collect::<Vec<_>>(),
            )
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl ControlPlane {
    pub fn new(vault: Vault, clock: Arc<dyn Clock>) -> Self {
        Self {
            gate: ApprovalGate::new(vault.clone(), Arc::clone(&clock)),
            tasks: TaskLoopController::new(vault.clone(), Arc::clone(&clock)),
            health: ServiceHealthTracker::new(vault.clone(), Arc::clone(&clock)),
            scheduler: Scheduler::new(vault.clone(), clock),
            replay_handlers: BTreeMap::new(),
            retry_policy: RetryPolicy::default(),
            events: vault.events().clone(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Vault::in_memory(), Arc::new(SystemClock))
    }

    pub fn from_settings(settings: &Settings, vault: Vault, clock: Arc<dyn Clock>) -> Self {
        Self {
            gate: ApprovalGate::new(vault.clone(), Arc::clone(&clock))
                .with_default_expiration_hours(settings.approvals.default_expiration_hours),
            tasks: TaskLoopController::new(vault.clone(), Arc::clone(&clock))
                .with_default_max_iterations(settings.tasks.default_max_iterations),
            health: ServiceHealthTracker::new(vault.clone(), Arc::clone(&clock))
                .with_failure_threshold(settings.health.failure_threshold),
            scheduler: Scheduler::new(vault.clone(), clock)
                .with_default_timezone(settings.scheduler.default_timezone.clone())
                .with_missed_grace(settings.missed_grace()),
            replay_handlers: BTreeMap::new(),
            retry_policy: settings.retry_policy(),
            events: vault.events().clone(),
        }
    }

    /// Creates the vault layout under the configured root, reconciles any
    /// records left in two states by a crash, and wires the components.
    pub fn open(settings: &Settings) -> Result<(Self, RecoveryReport), RuntimeError> {
        settings.validate()?;
        let paths = VaultPaths::new(settings.resolve_vault_root()?);
        bootstrap_vault(&paths)?;
        let vault = Vault::open(paths.root.clone());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let report = recover_vault(&vault, Arc::clone(&clock))?;
        vault.events().info(
            "runtime.opened",
            json!({ "vaultRoot": paths.root.display().to_string() }),
        );
        Ok((Self::from_settings(settings, vault, clock), report))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut ApprovalGate {
        &mut self.gate
    }

    pub fn tasks(&self) -> &TaskLoopController {
        &self.tasks
    }

    pub fn health(&self) -> &ServiceHealthTracker {
        &self.health
    }

    pub fn health_mut(&mut self) -> &mut ServiceHealthTracker {
        &mut self.health
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Handler used to replay a service's queued operations once the
    /// service is reachable again. Services without one have their queue
    /// drained instead.
    pub fn register_replay_handler(
        &mut self,
        service_name: impl Into<String>,
        handler: impl FnMut(&QueuedOperation) -> Result<(), String> + Send + 'static,
    ) {
        self.replay_handlers
            .insert(service_name.into(), Box::new(handler));
    }

    /// Calls `operation` against a tracked service with the configured
    /// backoff, sleeping the current thread between attempts.
    pub fn call_with_retry<T, F>(&mut self, service_name: &str, operation: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Result<T, String>,
    {
        retry_with_backoff(
            &mut self.health,
            service_name,
            &self.retry_policy,
            &mut |delay| thread::sleep(delay),
            operation,
        )
    }

    /// One polling pass: expire stale approvals, execute approved ones,
    /// flush queues of recovered services, then run due schedules. A
    /// failing step is recorded and the remaining steps still run.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        match self.gate.check_expired() {
            Ok(expired) => report.expired = expired.len(),
            Err(err) => report.errors.push(format!("check_expired: {err}")),
        }
        match self.gate.process_queue() {
            Ok(approvals) => report.approvals = approvals,
            Err(err) => report.errors.push(format!("process_queue: {err}")),
        }

        for service_name in self.health.service_names() {
            let waiting = self
                .health
                .get(&service_name)
                .is_some_and(|health| health.is_available() && health.queued_operations > 0);
            if !waiting {
                continue;
            }
            let outcome = match self.replay_handlers.get_mut(&service_name) {
                Some(handler) => self.health.replay_queue(&service_name, handler.as_mut()),
                None => self.health.drain_queue(&service_name),
            };
            match outcome {
                Ok(drained) => report.drained.push((service_name, drained)),
                Err(err) => report.errors.push(format!("queue {service_name}: {err}")),
            }
        }

        match self.scheduler.tick() {
            Ok(schedule) => report.schedule = schedule,
            Err(err) => report.errors.push(format!("scheduler: {err}")),
        }

        let fields = json!({
            "expired": report.expired,
            "executed": report.approvals.succeeded,
            "executionFailures": report.approvals.failed,
            "queuesFlushed": report.drained.len(),
            "schedulesRan": report.schedule.ran,
            "errors": report.errors,
        });
        if report.errors.is_empty() {
            self.events.info("poller.tick", fields);
        } else {
            self.events.warn("poller.tick", fields);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalCategory;
    use crate::shared::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::Map;
    use std::sync::Mutex;

    fn manual_plane() -> (ControlPlane, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid time"),
        ));
        (ControlPlane::new(Vault::in_memory(), clock.clone()), clock)
    }

    #[test]
    fn tick_expires_then_executes_approved_requests() {
        let (mut plane, clock) = manual_plane();
        let sent = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&sent);
        plane.gate_mut().executors_mut().register(
            ApprovalCategory::Email,
            move |_: &Map<String, serde_json::Value>| -> Result<(), String> {
                *counter.lock().expect("counter") += 1;
                Ok(())
            },
        );

        let mut payload = Map::new();
        payload.insert("to".into(), json!("ops@example.com"));
        payload.insert("subject".into(), json!("Invoice"));
        payload.insert("body".into(), json!("Attached."));
        let stale = plane
            .gate()
            .create_request(ApprovalCategory::Email, payload.clone(), Some(1), "stale")
            .expect("create stale");
        clock.advance(chrono::Duration::hours(2));
        let fresh = plane
            .gate()
            .create_request(ApprovalCategory::Email, payload, Some(4), "fresh")
            .expect("create fresh");
        plane.gate().approve(&fresh.id).expect("approve fresh");

        let report = plane.tick();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.expired, 1);
        assert_eq!(report.approvals.succeeded, 1);
        assert_eq!(*sent.lock().expect("counter"), 1);
        assert_eq!(plane.gate().list_rejected().expect("rejected")[0].id, stale.id);
        assert!(plane.events().contains_event("poller.tick"));
    }

    #[test]
    fn tick_replays_queues_of_recovered_services() {
        let (mut plane, _clock) = manual_plane();
        plane
            .health_mut()
            .register("gmail", "Gmail", true)
            .expect("register gmail");
        plane
            .health_mut()
            .register("bank", "Bank", false)
            .expect("register bank");
        plane
            .health_mut()
            .queue_failed_operation("gmail", "send_email", Map::new())
            .expect("queue gmail");
        plane
            .health_mut()
            .queue_failed_operation("bank", "sync", Map::new())
            .expect("queue bank");

        let replayed = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&replayed);
        plane.register_replay_handler("gmail", move |op: &QueuedOperation| {
            seen.lock().expect("seen").push(op.operation_type.clone());
            Ok(())
        });

        let report = plane.tick();
        assert_eq!(report.drained.len(), 2);
        assert_eq!(*replayed.lock().expect("seen"), vec!["send_email".to_string()]);
        assert!(plane.health().list_queue("gmail").expect("gmail queue").is_empty());
        assert!(plane.health().list_queue("bank").expect("bank queue").is_empty());
    }

    #[test]
    fn tick_leaves_queues_of_down_services() {
        let (mut plane, _clock) = manual_plane();
        plane
            .health_mut()
            .register("gmail", "Gmail", true)
            .expect("register");
        for _ in 0..3 {
            plane
                .health_mut()
                .record_failure("gmail", "connection refused")
                .expect("failure");
        }
        plane
            .health_mut()
            .queue_failed_operation("gmail", "send_email", Map::new())
            .expect("queue");

        let report = plane.tick();
        assert!(report.drained.is_empty());
        assert_eq!(plane.health().list_queue("gmail").expect("queue").len(), 1);
    }

    #[test]
    fn call_with_retry_uses_configured_policy() {
        let (plane, _clock) = manual_plane();
        let mut plane = plane.with_retry_policy(RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
        });
        plane
            .health_mut()
            .register("bank", "Bank", false)
            .expect("register");
        let result: Result<(), RetryError> =
            plane.call_with_retry("bank", |_| Err("503 service unavailable".to_string()));
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 2, .. })
        ));
    }
}
