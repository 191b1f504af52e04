//! Signal and dispatch throughput benchmarks.
//!
//! - `signal/collapsed`: signals to an already-alive task (OR only, no enqueue)
//! - `signal/round_trip`: signal, run on a worker, go idle
//! - `timer_heap/push_pop`: raw timer heap churn

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamsched::runtime::scheduler::TimerHeap;
use streamsched::{EventFlags, Scheduler, Step, TaskContext, TaskId};

fn scheduler(workers: usize) -> Scheduler {
    Scheduler::builder()
        .worker_threads(workers)
        .event_thread(false)
        .build()
        .expect("build scheduler")
}

fn bench_signal(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal");

    // No workers: the first signal parks the task as pending and every
    // later one only ORs bits into the mask.
    let idle = scheduler(0);
    let handle = idle
        .spawn("collapsed", |_cx: &mut TaskContext<'_>| Step::Idle)
        .expect("spawn");
    handle.signal(EventFlags::START);
    group.throughput(Throughput::Elements(1));
    group.bench_function("collapsed", |b| {
        b.iter(|| black_box(handle.signal(black_box(EventFlags::READ))));
    });
    idle.shutdown();

    for workers in [1usize, 4] {
        let sched = scheduler(workers);
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = {
            let runs = Arc::clone(&runs);
            sched
                .spawn("round-trip", move |_cx: &mut TaskContext<'_>| {
                    runs.fetch_add(1, Ordering::Release);
                    Step::Idle
                })
                .expect("spawn")
        };
        group.bench_with_input(BenchmarkId::new("round_trip", workers), &workers, |b, _| {
            b.iter(|| {
                let before = runs.load(Ordering::Acquire);
                handle.signal(EventFlags::READ);
                // A signal that lands mid-run fails the idle CAS and forces
                // another run, so the counter always advances.
                while runs.load(Ordering::Acquire) == before {
                    std::hint::spin_loop();
                }
            });
        });
        sched.shutdown();
    }
    group.finish();
}

fn bench_timer_heap(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_heap");
    for size in [64u32, 1024] {
        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::new("push_pop", size), &size, |b, &size| {
            b.iter(|| {
                let mut heap = TimerHeap::new();
                for n in 0..size {
                    let at = u64::from(n.wrapping_mul(2_654_435_761) % 10_000);
                    heap.push(TaskId::new_for_test(n, 0), at);
                }
                while let Some(id) = heap.pop() {
                    black_box(id);
                }
            });
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(3));
    targets = bench_signal, bench_timer_heap
}
criterion_main!(benches);
