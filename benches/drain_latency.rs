use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use gen_stash::{Connection, Resource};

/// Benchmark: advance_and_drain with only idle sessions registered
fn bench_drain_idle(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_idle");

    for sessions in [0usize, 8, 64].iter() {
        group.bench_with_input(BenchmarkId::new("sessions", sessions), sessions, |b, &sessions| {
            let conn = Connection::new();
            let _idle: Vec<_> = (0..sessions).map(|_| conn.open_session()).collect();
            let drainer = conn.open_session();

            b.iter(|| black_box(drainer.advance_and_drain(Resource::Checkpoint)));
        });
    }

    group.finish();
}

/// Benchmark: advance_and_drain while readers keep entering and leaving
fn bench_drain_under_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_under_churn");

    for readers in [1usize, 2, 4].iter() {
        group.bench_with_input(BenchmarkId::new("readers", readers), readers, |b, &readers| {
            let conn = Connection::new();
            let stop = Arc::new(AtomicBool::new(false));
            let handles: Vec<_> = (0..readers)
                .map(|_| {
                    let conn = conn.clone();
                    let stop = stop.clone();
                    thread::spawn(move || {
                        let session = conn.open_session();
                        while !stop.load(Ordering::Relaxed) {
                            let _guard = session.pin(Resource::Checkpoint);
                            for _ in 0..32 {
                                std::hint::spin_loop();
                            }
                        }
                    })
                })
                .collect();

            let drainer = conn.open_session();
            b.iter(|| black_box(drainer.advance_and_drain(Resource::Checkpoint)));

            stop.store(true, Ordering::Relaxed);
            for handle in handles {
                let _ = handle.join();
            }
        });
    }

    group.finish();
}

criterion_group!(benches, bench_drain_idle, bench_drain_under_churn);
criterion_main!(benches);
