use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;
use vaultgate::schedule::{
    MissedAction, MissedStrategy, ScheduleError, ScheduledTask, Scheduler, TaskType,
    TaskTypeRegistry,
};
use vaultgate::shared::ManualClock;
use vaultgate::store::Vault;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, day, hour, minute, 0)
        .single()
        .expect("valid time")
}

fn scheduler(root: &std::path::Path, clock: Arc<ManualClock>) -> Scheduler {
    Scheduler::new(Vault::open(root), clock)
}

#[test]
fn scheduler_module_persists_definitions_and_run_history() {
    let tmp = tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(at(1, 6, 0)));
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let mut executors = TaskTypeRegistry::new();
    executors.register(TaskType::Briefing, move |task: &ScheduledTask| -> Result<String, String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("briefing sent for {}", task.name))
    });
    let scheduler = scheduler(tmp.path(), clock.clone()).with_executors(executors);

    let added = scheduler
        .add(ScheduledTask::new("Morning Briefing", "0 8 * * *", TaskType::Briefing))
        .expect("add");
    assert!(added);
    let task = scheduler.list().expect("list").remove(0);
    assert_eq!(task.next_run, Some(at(1, 8, 0)));
    assert_eq!(task.timezone, "UTC");
    assert!(tmp
        .path()
        .join(format!("schedules/{}.md", task.id))
        .is_file());

    let result = scheduler.run(&task.id).expect("run");
    assert!(result.success);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // same name updates in place and keeps the run history
    let re_added = scheduler
        .add(
            ScheduledTask::new("Morning Briefing", "0 8 * * *", TaskType::Briefing)
                .with_timezone("Europe/London"),
        )
        .expect("re-add");
    assert!(!re_added);
    let restarted = Scheduler::new(Vault::open(tmp.path()), clock);
    let tasks = restarted.list().expect("list");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].timezone, "Europe/London");
    assert_eq!(tasks[0].last_run, Some(at(1, 6, 0)));
    assert_eq!(
        tasks[0].last_result.as_deref(),
        Some("briefing sent for Morning Briefing")
    );
    // 08:00 London in June is 07:00 UTC
    assert_eq!(tasks[0].next_run, Some(at(1, 7, 0)));
}

#[test]
fn scheduler_module_records_failed_runs_and_refuses_disabled_tasks() {
    let tmp = tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(at(1, 6, 0)));
    let scheduler = scheduler(tmp.path(), clock);
    scheduler
        .add(ScheduledTask::new("Weekly audit", "0 9 * * MON", TaskType::Audit))
        .expect("add");
    let id = scheduler.list().expect("list")[0].id.clone();

    let result = scheduler.run(&id).expect("run");
    assert!(!result.success);
    let task = scheduler.get(&id).expect("get").expect("task");
    assert!(task.last_run.is_some());
    assert_eq!(task.last_result.as_deref(), Some("failed"));
    assert!(task.error.unwrap_or_default().contains("audit"));

    scheduler.disable(&id).expect("disable");
    assert!(matches!(
        scheduler.run(&id),
        Err(ScheduleError::Disabled { .. })
    ));
    assert!(matches!(
        scheduler.run("nope"),
        Err(ScheduleError::NotFound { .. })
    ));
    assert!(scheduler.remove(&id).expect("remove"));
    assert!(!scheduler.remove(&id).expect("remove again"));
}

#[test]
fn scheduler_module_handles_missed_runs_per_strategy() {
    let tmp = tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(at(1, 6, 0)));
    let scheduler = scheduler(tmp.path(), clock.clone());
    scheduler
        .add(
            ScheduledTask::new("Dashboard", "*/30 * * * *", TaskType::Custom)
                .with_missed_strategy(MissedStrategy::Skip),
        )
        .expect("add skip");
    scheduler
        .add(
            ScheduledTask::new("Approval sweep", "0 * * * *", TaskType::Custom)
                .with_missed_strategy(MissedStrategy::Queue),
        )
        .expect("add queue");

    clock.set(at(1, 9, 10));
    let missed = scheduler.get_missed().expect("missed");
    assert_eq!(missed.len(), 2);

    for task in missed {
        let outcome = scheduler.handle_missed(&task.id).expect("handle");
        match task.missed_strategy {
            MissedStrategy::Skip => {
                assert_eq!(outcome.action, MissedAction::Skipped);
                assert!(outcome.result.is_none());
                let skipped = scheduler.get(&task.id).expect("get").expect("task");
                assert_eq!(skipped.next_run, Some(at(1, 9, 30)));
                assert!(skipped.last_run.is_none());
            }
            _ => {
                assert_eq!(outcome.action, MissedAction::Ran);
                assert!(outcome.result.expect("result").success);
            }
        }
    }
    assert!(scheduler.get_missed().expect("missed").is_empty());
}

#[test]
fn scheduler_module_tick_runs_one_shot_once() {
    let tmp = tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(at(1, 6, 0)));
    let scheduler = scheduler(tmp.path(), clock.clone());
    scheduler
        .add(ScheduledTask::new(
            "Quarter close reminder",
            "2026-06-01T12:00:00Z",
            TaskType::Custom,
        ))
        .expect("add");

    assert_eq!(scheduler.tick().expect("early tick").ran, 0);
    clock.set(at(1, 12, 0) + Duration::seconds(20));
    let report = scheduler.tick().expect("tick");
    assert_eq!(report.ran, 1);
    assert!(report.errors.is_empty());

    let task = scheduler.list().expect("list").remove(0);
    assert!(!task.enabled);
    assert!(task.next_run.is_none());
    clock.advance(Duration::days(1));
    assert_eq!(scheduler.tick().expect("later tick").ran, 0);
}

#[test]
fn scheduler_module_tasks_added_disabled_stay_idle_until_enabled() {
    let tmp = tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(at(1, 6, 0)));
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let mut executors = TaskTypeRegistry::new();
    executors.register(
        TaskType::UpdateDashboard,
        move |_: &ScheduledTask| -> Result<String, String> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("dashboard refreshed".to_string())
        },
    );
    let scheduler = scheduler(tmp.path(), clock.clone()).with_executors(executors);
    scheduler
        .add(
            ScheduledTask::new("Dashboard refresh", "0 * * * *", TaskType::UpdateDashboard)
                .disabled(),
        )
        .expect("add");
    let id = scheduler.list().expect("list")[0].id.clone();
    assert!(!scheduler.get(&id).expect("get").expect("task").enabled);

    clock.set(at(1, 9, 10));
    assert!(scheduler.get_missed().expect("missed").is_empty());
    assert_eq!(scheduler.tick().expect("tick").ran, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let enabled = scheduler.enable(&id).expect("enable");
    assert_eq!(enabled.next_run, Some(at(1, 10, 0)));
    clock.set(at(1, 10, 0));
    assert_eq!(scheduler.tick().expect("tick").ran, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
