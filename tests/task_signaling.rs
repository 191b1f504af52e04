//! Task signal protocol and worker pool behavior.
//!
//! Covers exactly-once enqueue, at-most-one concurrent run, the idle
//! compare-and-swap, timer ordering and the sleep floor, the global
//! read/write lock, pinning, and worker removal.

#[macro_use]
mod common;

use common::{counting_task, init_test_logging, test_scheduler, wait_until};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use streamsched::{EventFlags, Scheduler, Step, TaskContext, TaskPanicResponse};

const WAIT: Duration = Duration::from_secs(5);

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

/// Occupies a worker until `release` is set.
fn blocker(running: &Arc<AtomicBool>, release: &Arc<AtomicBool>) -> impl FnMut(&mut TaskContext<'_>) -> Step + Send + 'static {
    let running = Arc::clone(running);
    let release = Arc::clone(release);
    move |_cx: &mut TaskContext<'_>| {
        running.store(true, Ordering::SeqCst);
        while !release.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        Step::Finish
    }
}

#[test]
fn concurrent_signals_enqueue_once_and_run_once() {
    init_test("concurrent_signals_enqueue_once_and_run_once");
    let scheduler = test_scheduler(1);

    let running = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let busy = scheduler.spawn("blocker", blocker(&running, &release)).expect("spawn");
    busy.signal(EventFlags::START);
    assert!(wait_until(WAIT, || running.load(Ordering::SeqCst)));

    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(EventFlags::NONE));
    let target = {
        let runs = Arc::clone(&runs);
        let seen = Arc::clone(&seen);
        scheduler
            .spawn("target", move |cx: &mut TaskContext<'_>| {
                runs.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = cx.events();
                Step::Idle
            })
            .expect("spawn")
    };

    test_section!("five concurrent signals");
    let barrier = Arc::new(Barrier::new(5));
    let enqueued: usize = (0..5)
        .map(|_| {
            let target = target.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                usize::from(target.signal(EventFlags::READ))
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().expect("signaler panicked"))
        .sum();
    assert_with_log!(enqueued == 1, "signals that enqueued", 1, enqueued);
    let queued = scheduler.queue_len(0);
    assert_with_log!(queued == Some(1), "queue length", Some(1), queued);

    test_section!("release worker");
    release.store(true, Ordering::SeqCst);
    assert!(wait_until(WAIT, || runs.load(Ordering::SeqCst) == 1));
    thread::sleep(Duration::from_millis(30));
    let total = runs.load(Ordering::SeqCst);
    assert_with_log!(total == 1, "runs", 1, total);
    assert_eq!(scheduler.queue_len(0), Some(0));
    let events = *seen.lock();
    assert_with_log!(events == EventFlags::READ, "observed events", EventFlags::READ, events);

    scheduler.shutdown();
    test_complete!("concurrent_signals_enqueue_once_and_run_once");
}

#[test]
fn idle_task_runs_again_on_later_signal() {
    init_test("idle_task_runs_again_on_later_signal");
    let scheduler = test_scheduler(2);
    let runs = Arc::new(AtomicUsize::new(0));
    let handle = scheduler.spawn("idler", counting_task(&runs)).expect("spawn");

    handle.signal(EventFlags::START);
    assert!(wait_until(WAIT, || runs.load(Ordering::SeqCst) == 1));
    // Let the worker finish the idle transition before the next signal.
    thread::sleep(Duration::from_millis(20));

    let enqueued = handle.signal(EventFlags::READ);
    assert_with_log!(enqueued, "idle task enqueued again", true, enqueued);
    assert!(wait_until(WAIT, || runs.load(Ordering::SeqCst) == 2));

    scheduler.shutdown();
    test_complete!("idle_task_runs_again_on_later_signal");
}

#[test]
fn signal_during_run_forces_another_run() {
    init_test("signal_during_run_forces_another_run");
    let scheduler = test_scheduler(1);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let seen = Arc::clone(&seen);
        scheduler
            .spawn("self-signaler", move |cx: &mut TaskContext<'_>| {
                let events = cx.events();
                seen.lock().push(events);
                if events.contains(EventFlags::START) {
                    cx.handle().signal(EventFlags::UPDATE);
                }
                Step::Idle
            })
            .expect("spawn")
    };

    handle.signal(EventFlags::START);
    assert!(wait_until(WAIT, || seen.lock().len() == 2));
    let seen = seen.lock().clone();
    let expected = vec![EventFlags::START, EventFlags::UPDATE];
    assert_with_log!(seen == expected, "event sequence", expected, seen);

    scheduler.shutdown();
    test_complete!("signal_during_run_forces_another_run");
}

#[test]
fn run_never_overlaps_itself() {
    init_test("run_never_overlaps_itself");
    let scheduler = test_scheduler(4);
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let handle = {
        let active = Arc::clone(&active);
        let max_active = Arc::clone(&max_active);
        let runs = Arc::clone(&runs);
        scheduler
            .spawn("contended", move |_cx: &mut TaskContext<'_>| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_micros(200));
                active.fetch_sub(1, Ordering::SeqCst);
                runs.fetch_add(1, Ordering::SeqCst);
                Step::Idle
            })
            .expect("spawn")
    };

    let signalers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    handle.signal(EventFlags::READ);
                    thread::yield_now();
                }
            })
        })
        .collect();
    for s in signalers {
        s.join().expect("signaler panicked");
    }
    assert!(wait_until(WAIT, || active.load(Ordering::SeqCst) == 0 && runs.load(Ordering::SeqCst) > 0));

    let max = max_active.load(Ordering::SeqCst);
    assert_with_log!(max == 1, "max concurrent runs", 1, max);
    scheduler.shutdown();
    test_complete!("run_never_overlaps_itself");
}

#[test]
fn timers_fire_in_wake_order() {
    init_test("timers_fire_in_wake_order");
    let scheduler = test_scheduler(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = [("t500", 500u64), ("t100", 100), ("t300", 300)]
        .into_iter()
        .map(|(name, ms)| {
            let order = Arc::clone(&order);
            scheduler
                .spawn(name, move |cx: &mut TaskContext<'_>| {
                    if cx.events().contains(EventFlags::START) {
                        return Step::WakeAfter(Duration::from_millis(ms));
                    }
                    order.lock().push(cx.name().to_string());
                    Step::Finish
                })
                .expect("spawn")
        })
        .collect();
    for handle in &handles {
        handle.signal(EventFlags::START);
    }

    assert!(wait_until(WAIT, || order.lock().len() == 3));
    let order = order.lock().clone();
    assert_with_log!(
        order == ["t100", "t300", "t500"],
        "wake order",
        ["t100", "t300", "t500"],
        order
    );
    assert!(wait_until(WAIT, || scheduler.task_count() == 0));
    scheduler.shutdown();
    test_complete!("timers_fire_in_wake_order");
}

/// Runs a task that asks for a 3 ms sleep and returns the observed gap and
/// the events seen on the timer wake.
fn three_ms_sleep(scheduler: &Scheduler) -> (Duration, EventFlags) {
    let stamps = Arc::new(Mutex::new(Vec::<(Instant, EventFlags)>::new()));
    let handle = {
        let stamps = Arc::clone(&stamps);
        scheduler
            .spawn("sleeper", move |cx: &mut TaskContext<'_>| {
                let mut stamps = stamps.lock();
                stamps.push((Instant::now(), cx.events()));
                if stamps.len() == 1 {
                    Step::WakeAfter(Duration::from_millis(3))
                } else {
                    Step::Finish
                }
            })
            .expect("spawn")
    };
    handle.signal(EventFlags::START);

    assert!(wait_until(WAIT, || stamps.lock().len() == 2));
    let stamps = stamps.lock().clone();
    (stamps[1].0 - stamps[0].0, stamps[1].1)
}

#[test]
fn short_sleep_is_clamped_to_floor() {
    init_test("short_sleep_is_clamped_to_floor");
    let scheduler = test_scheduler(1);
    let (gap, woke_with) = three_ms_sleep(&scheduler);
    assert_with_log!(
        gap >= Duration::from_millis(10),
        "sleep floor",
        Duration::from_millis(10),
        gap
    );
    assert_with_log!(
        woke_with.contains(EventFlags::IDLE),
        "timer wake carries IDLE",
        EventFlags::IDLE,
        woke_with
    );
    scheduler.shutdown();
    test_complete!("short_sleep_is_clamped_to_floor");
}

#[test]
fn configured_floor_below_ten_ms_still_clamps() {
    init_test("configured_floor_below_ten_ms_still_clamps");
    let scheduler = Scheduler::builder()
        .worker_threads(1)
        .event_thread(false)
        .on_task_panic(TaskPanicResponse::Log)
        .min_sleep(Duration::from_millis(1))
        .build()
        .expect("build");
    assert_eq!(scheduler.config().min_sleep, Duration::from_millis(10));
    let (gap, _) = three_ms_sleep(&scheduler);
    assert_with_log!(
        gap >= Duration::from_millis(10),
        "floor holds under a lower setting",
        Duration::from_millis(10),
        gap
    );
    scheduler.shutdown();
    test_complete!("configured_floor_below_ten_ms_still_clamps");
}

#[test]
fn write_lock_excludes_other_runs() {
    init_test("write_lock_excludes_other_runs");
    let scheduler = test_scheduler(4);
    let readers_active = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|i| {
            let active = Arc::clone(&readers_active);
            let stop = Arc::clone(&stop);
            scheduler
                .spawn(format!("reader-{i}"), move |_cx: &mut TaskContext<'_>| {
                    if stop.load(Ordering::SeqCst) {
                        return Step::Finish;
                    }
                    active.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Step::WakeAfter(Duration::from_millis(10))
                })
                .expect("spawn")
        })
        .collect();
    for reader in &readers {
        reader.signal(EventFlags::START);
    }

    let overlaps = Arc::new(AtomicUsize::new(0));
    let exclusive_runs = Arc::new(AtomicUsize::new(0));
    let writer = {
        let active = Arc::clone(&readers_active);
        let overlaps = Arc::clone(&overlaps);
        let exclusive_runs = Arc::clone(&exclusive_runs);
        scheduler
            .spawn("writer", move |cx: &mut TaskContext<'_>| {
                if cx.holds_write_lock() {
                    exclusive_runs.fetch_add(1, Ordering::SeqCst);
                    if active.load(Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Step::Idle
            })
            .expect("spawn")
    };

    for round in 1..=10 {
        writer.request_write_lock();
        writer.signal(EventFlags::UPDATE);
        assert!(wait_until(WAIT, || exclusive_runs.load(Ordering::SeqCst) == round));
        thread::sleep(Duration::from_millis(3));
    }
    stop.store(true, Ordering::SeqCst);

    let overlaps = overlaps.load(Ordering::SeqCst);
    assert_with_log!(overlaps == 0, "reader overlapped writer", 0, overlaps);
    scheduler.shutdown();
    test_complete!("write_lock_excludes_other_runs");
}

#[test]
fn write_lock_request_covers_one_run() {
    init_test("write_lock_request_covers_one_run");
    let scheduler = test_scheduler(1);
    let modes = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let modes = Arc::clone(&modes);
        scheduler
            .spawn("writer", move |cx: &mut TaskContext<'_>| {
                modes.lock().push(cx.holds_write_lock());
                Step::Idle
            })
            .expect("spawn")
    };

    handle.request_write_lock();
    handle.signal(EventFlags::START);
    assert!(wait_until(WAIT, || modes.lock().len() == 1));
    thread::sleep(Duration::from_millis(20));
    handle.signal(EventFlags::READ);
    assert!(wait_until(WAIT, || modes.lock().len() == 2));

    let modes = modes.lock().clone();
    assert_with_log!(modes == [true, false], "lock modes", [true, false], modes);
    scheduler.shutdown();
    test_complete!("write_lock_request_covers_one_run");
}

#[test]
fn global_unlock_releases_early() {
    init_test("global_unlock_releases_early");
    let scheduler = test_scheduler(1);
    let observed = Arc::new(Mutex::new(None));
    let handle = {
        let observed = Arc::clone(&observed);
        scheduler
            .spawn("unlocker", move |cx: &mut TaskContext<'_>| {
                let before = cx.holds_global_lock();
                cx.global_unlock();
                let locked_elsewhere = cx.scheduler().global_lock().is_locked();
                *observed.lock() = Some((before, cx.holds_global_lock(), locked_elsewhere));
                Step::Finish
            })
            .expect("spawn")
    };
    handle.signal(EventFlags::START);
    assert!(wait_until(WAIT, || observed.lock().is_some()));
    let observed = observed.lock().take();
    assert_with_log!(
        observed == Some((true, false, false)),
        "(before, after, lock held)",
        Some((true, false, false)),
        observed
    );
    scheduler.shutdown();
    test_complete!("global_unlock_releases_early");
}

#[test]
fn kill_finishes_and_later_signals_are_ignored() {
    init_test("kill_finishes_and_later_signals_are_ignored");
    let scheduler = test_scheduler(1);
    let handle = scheduler
        .spawn("killable", |cx: &mut TaskContext<'_>| {
            if cx.events().contains(EventFlags::KILL) {
                Step::Finish
            } else {
                Step::Idle
            }
        })
        .expect("spawn");
    assert_eq!(handle.name().as_deref(), Some("killable"));

    handle.signal(EventFlags::START);
    handle.kill();
    assert!(wait_until(WAIT, || !handle.is_alive()));
    assert!(wait_until(WAIT, || scheduler.task_count() == 0));

    let enqueued = handle.signal(EventFlags::READ);
    assert_with_log!(!enqueued, "signal to destroyed task", false, enqueued);
    assert_eq!(handle.name(), None);
    scheduler.shutdown();
    test_complete!("kill_finishes_and_later_signals_are_ignored");
}

#[test]
fn panicking_task_is_destroyed_under_log_policy() {
    init_test("panicking_task_is_destroyed_under_log_policy");
    let scheduler = test_scheduler(1);
    let bad = scheduler
        .spawn("bad", |_cx: &mut TaskContext<'_>| -> Step { panic!("boom") })
        .expect("spawn");
    bad.signal(EventFlags::START);
    assert!(wait_until(WAIT, || !bad.is_alive()));

    let runs = Arc::new(AtomicUsize::new(0));
    let good = scheduler.spawn("good", counting_task(&runs)).expect("spawn");
    good.signal(EventFlags::START);
    assert!(wait_until(WAIT, || runs.load(Ordering::SeqCst) == 1));
    scheduler.shutdown();
    test_complete!("panicking_task_is_destroyed_under_log_policy");
}

#[test]
fn force_same_thread_keeps_task_on_worker() {
    init_test("force_same_thread_keeps_task_on_worker");
    let scheduler = test_scheduler(4);
    let workers = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let workers = Arc::clone(&workers);
        scheduler
            .spawn("sticky", move |cx: &mut TaskContext<'_>| {
                workers.lock().push(cx.worker_id());
                cx.force_same_thread();
                Step::Idle
            })
            .expect("spawn")
    };

    for n in 1..=12 {
        handle.signal(EventFlags::READ);
        assert!(wait_until(WAIT, || workers.lock().len() == n));
        thread::sleep(Duration::from_millis(2));
    }
    let workers = workers.lock().clone();
    let first = workers[0];
    assert_with_log!(
        workers.iter().all(|&w| w == first),
        "all runs on one worker",
        first,
        workers
    );
    scheduler.shutdown();
    test_complete!("force_same_thread_keeps_task_on_worker");
}

#[test]
fn pin_to_routes_next_run() {
    init_test("pin_to_routes_next_run");
    let scheduler = test_scheduler(3);
    let ran_on = Arc::new(Mutex::new(None));
    let handle = {
        let ran_on = Arc::clone(&ran_on);
        scheduler
            .spawn("pinned", move |cx: &mut TaskContext<'_>| {
                *ran_on.lock() = Some(cx.worker_id());
                Step::Finish
            })
            .expect("spawn")
    };
    handle.pin_to(2);
    handle.signal(EventFlags::START);
    assert!(wait_until(WAIT, || ran_on.lock().is_some()));
    let worker = *ran_on.lock();
    assert_with_log!(worker == Some(2), "worker", Some(2), worker);
    scheduler.shutdown();
    test_complete!("pin_to_routes_next_run");
}

#[test]
fn signals_wait_for_first_worker() {
    init_test("signals_wait_for_first_worker");
    let scheduler = test_scheduler(0);
    let runs = Arc::new(AtomicUsize::new(0));
    let handle = scheduler.spawn("early", counting_task(&runs)).expect("spawn");

    assert!(handle.signal(EventFlags::START));
    assert_eq!(scheduler.pending_len(), 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    scheduler.add_workers(1).expect("add worker");
    assert!(wait_until(WAIT, || runs.load(Ordering::SeqCst) == 1));
    assert_eq!(scheduler.pending_len(), 0);
    scheduler.shutdown();
    test_complete!("signals_wait_for_first_worker");
}

#[test]
fn removing_workers_hands_off_sleepers() {
    init_test("removing_workers_hands_off_sleepers");
    let scheduler = test_scheduler(2);
    let wakes = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let wakes = Arc::clone(&wakes);
        scheduler
            .spawn("long-sleeper", move |cx: &mut TaskContext<'_>| {
                wakes.lock().push(cx.events());
                if cx.events().contains(EventFlags::START) {
                    Step::WakeAfter(Duration::from_secs(3600))
                } else {
                    Step::Finish
                }
            })
            .expect("spawn")
    };
    handle.signal(EventFlags::START);
    assert!(wait_until(WAIT, || {
        (0..2).filter_map(|w| scheduler.timer_len(w)).sum::<usize>() == 1
    }));

    scheduler.remove_workers();
    assert_eq!(scheduler.worker_count(), 0);
    assert_eq!(scheduler.pending_len(), 1);

    scheduler.add_workers(1).expect("add worker");
    assert!(wait_until(WAIT, || wakes.lock().len() == 2));
    let second = wakes.lock()[1];
    assert_with_log!(
        second.contains(EventFlags::IDLE),
        "early wake carries IDLE",
        EventFlags::IDLE,
        second
    );
    scheduler.shutdown();
    test_complete!("removing_workers_hands_off_sleepers");
}

#[test]
fn spawn_after_shutdown_fails() {
    init_test("spawn_after_shutdown_fails");
    let scheduler = test_scheduler(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let handle = scheduler.spawn("orphan", counting_task(&runs)).expect("spawn");
    scheduler.shutdown();
    scheduler.shutdown();

    assert!(!handle.is_alive());
    assert!(!handle.signal(EventFlags::START));
    let err = scheduler
        .spawn("late", counting_task(&runs))
        .expect_err("shut down");
    assert_with_log!(
        err.kind() == streamsched::ErrorKind::ShutDown,
        "kind",
        streamsched::ErrorKind::ShutDown,
        err.kind()
    );
    test_complete!("spawn_after_shutdown_fails");
}
