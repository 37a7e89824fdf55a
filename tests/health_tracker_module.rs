use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use vaultgate::health::{
    classify_error, retry_with_backoff, ErrorCategory, HealthError, OperationStatus,
    QueuedOperation, RetryError, RetryPolicy, ServiceHealthTracker, ServiceStatus,
};
use vaultgate::shared::SystemClock;
use vaultgate::store::Vault;

fn tracker(root: &std::path::Path) -> ServiceHealthTracker {
    ServiceHealthTracker::new(Vault::open(root), Arc::new(SystemClock))
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object params")
}

#[test]
fn health_tracker_module_three_failures_take_gmail_down_and_one_success_restores_it() {
    let tmp = tempdir().expect("tempdir");
    let mut tracker = tracker(tmp.path());
    let registered = tracker.register("gmail", "Gmail", true).expect("register");
    assert_eq!(registered.status, ServiceStatus::Unknown);
    assert!(tracker.is_available("gmail"));

    let statuses: Vec<ServiceStatus> = (0..3)
        .map(|_| {
            tracker
                .record_failure("gmail", "connection reset by peer")
                .expect("failure")
                .status
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ServiceStatus::Degraded,
            ServiceStatus::Degraded,
            ServiceStatus::Down
        ]
    );
    assert!(!tracker.is_available("gmail"));
    let down = tracker.get("gmail").expect("gmail");
    assert_eq!(down.error_category, Some(ErrorCategory::Transient));
    assert_eq!(tracker.list_degraded().len(), 1);

    let healed = tracker.record_success("gmail").expect("success");
    assert_eq!(healed.status, ServiceStatus::Healthy);
    assert_eq!(healed.consecutive_failures, 0);
    assert!(healed.last_error.is_none());
    assert!(tracker.is_available("gmail"));
    assert!(tracker.list_degraded().is_empty());
}

#[test]
fn health_tracker_module_register_is_first_wins_and_unknown_names_fail() {
    let tmp = tempdir().expect("tempdir");
    let mut tracker = tracker(tmp.path());
    tracker.register("odoo", "Odoo ERP", true).expect("register");
    tracker.record_failure("odoo", "401 Unauthorized").expect("failure");
    let again = tracker.register("odoo", "Renamed", false).expect("register again");
    assert_eq!(again.display_name, "Odoo ERP");
    assert!(again.is_critical);
    assert_eq!(again.consecutive_failures, 1);
    assert_eq!(again.error_category, Some(ErrorCategory::Authentication));

    assert!(!tracker.is_available("twitter"));
    assert!(matches!(
        tracker.record_success("twitter"),
        Err(HealthError::NotRegistered { .. })
    ));
    assert!(matches!(
        tracker.queue_failed_operation("twitter", "post", Map::new()),
        Err(HealthError::NotRegistered { .. })
    ));
}

#[test]
fn health_tracker_module_queue_is_durable_across_restarts() {
    let tmp = tempdir().expect("tempdir");
    let mut first = tracker(tmp.path());
    first.register("meta", "Meta Graph", false).expect("register");
    let op_id = first
        .queue_failed_operation("meta", "publish_post", params(json!({ "postId": "p-17" })))
        .expect("queue");
    first
        .queue_failed_operation("meta", "publish_post", params(json!({ "postId": "p-18" })))
        .expect("queue");
    assert!(tmp
        .path()
        .join(format!("queue/meta/{op_id}.json"))
        .is_file());

    let mut restarted = tracker(tmp.path());
    let health = restarted.register("meta", "Meta Graph", false).expect("register");
    assert_eq!(health.queued_operations, 2);

    let mut calls = 0;
    let report = restarted
        .replay_queue("meta", &mut |op: &QueuedOperation| {
            calls += 1;
            if op.parameters.get("postId") == Some(&json!("p-17")) {
                Ok(())
            } else {
                Err("rate limit exceeded".to_string())
            }
        })
        .expect("replay");
    assert_eq!(calls, 2);
    assert_eq!((report.total, report.processed, report.failed), (2, 1, 1));

    let left = restarted.list_queue("meta").expect("queue");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].status, OperationStatus::Retrying);
    assert_eq!(left[0].attempts, 1);
    assert_eq!(restarted.get("meta").expect("meta").queued_operations, 1);

    let drained = restarted.drain_queue("meta").expect("drain");
    assert_eq!((drained.total, drained.processed, drained.failed), (1, 1, 0));
    assert_eq!(restarted.get("meta").expect("meta").queued_operations, 0);
    assert!(restarted.list_queue("meta").expect("queue").is_empty());
}

#[test]
fn health_tracker_module_retries_transient_failures_only() {
    let tmp = tempdir().expect("tempdir");
    let mut tracker = tracker(tmp.path());
    tracker.register("bank", "Bank feed", true).expect("register");
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(150),
    };

    let mut slept = Vec::new();
    let value = retry_with_backoff(
        &mut tracker,
        "bank",
        &policy,
        &mut |delay: Duration| slept.push(delay),
        |attempt| {
            if attempt < 3 {
                Err("request timed out".to_string())
            } else {
                Ok(attempt)
            }
        },
    )
    .expect("eventually succeeds");
    assert_eq!(value, 3);
    assert_eq!(
        slept,
        vec![Duration::from_millis(100), Duration::from_millis(150)]
    );
    assert_eq!(tracker.get("bank").expect("bank").status, ServiceStatus::Healthy);

    let mut attempts = 0;
    let err = retry_with_backoff(
        &mut tracker,
        "bank",
        &policy,
        &mut |_delay: Duration| {},
        |_| -> Result<(), String> {
            attempts += 1;
            Err("403 Forbidden".to_string())
        },
    )
    .expect_err("auth errors are not retried");
    assert_eq!(attempts, 1);
    assert!(matches!(
        err,
        RetryError::NonRetryable {
            category: ErrorCategory::Authentication,
            ..
        }
    ));
    assert_eq!(classify_error("invalid account number"), ErrorCategory::Permanent);
}
