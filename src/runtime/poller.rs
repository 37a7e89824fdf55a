use super::control_plane::ControlPlane;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Sleeps up to `total`, waking early when `stop` is set. Returns `false`
/// if the loop should stop.
pub(crate) fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

/// Ticks the control plane every `interval` until `stop` is set. Returns
/// the number of ticks run.
pub fn run_poller(plane: &mut ControlPlane, stop: &AtomicBool, interval: Duration) -> usize {
    let mut ticks = 0;
    let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    plane
        .events()
        .info("poller.started", json!({ "intervalMs": interval_ms }));
    while !stop.load(Ordering::Relaxed) {
        plane.tick();
        ticks += 1;
        if !sleep_with_stop(stop, interval) {
            break;
        }
    }
    plane
        .events()
        .info("poller.stopped", json!({ "ticks": ticks }));
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn sleep_with_stop_returns_early_when_stopped() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        assert!(!sleep_with_stop(&stop, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn poller_ticks_until_stopped() {
        let mut plane = ControlPlane::in_memory();
        let stop = Arc::new(AtomicBool::new(false));
        let stopper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                stop.store(true, Ordering::Relaxed);
            })
        };
        let ticks = run_poller(&mut plane, &stop, Duration::from_millis(10));
        stopper.join().expect("join stopper");
        assert!(ticks >= 1);
        assert!(plane.events().contains_event("poller.tick"));
        assert!(plane.events().contains_event("poller.stopped"));
    }

    #[test]
    fn poller_does_nothing_when_already_stopped() {
        let mut plane = ControlPlane::in_memory();
        let stop = AtomicBool::new(true);
        assert_eq!(run_poller(&mut plane, &stop, Duration::from_millis(10)), 0);
    }

    #[test]
    fn poller_start_event_saturates_huge_intervals() {
        let mut plane = ControlPlane::in_memory();
        let stop = AtomicBool::new(true);
        run_poller(&mut plane, &stop, Duration::MAX);
        let started = plane
            .events()
            .lines()
            .into_iter()
            .find(|line| line.contains("poller.started"))
            .expect("start event");
        let value: serde_json::Value = serde_json::from_str(&started).expect("json line");
        assert_eq!(value["intervalMs"], json!(u64::MAX));
    }
}
